//! Strategy Manager
//!
//! Policy layer over the client: get-or-load, refresh-ahead, LRU/LFU access
//! tracking, size and memory triggered eviction, tag invalidation, warmup
//! and statistics.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::KvBackend;
use crate::client::{access_key, is_entry_key, CacheClient, ACCESS_NAMESPACE};
use crate::config::{CacheStrategy, StrategyConfig};
use crate::error::{CacheError, Result};
use crate::strategy::eviction::{access_stamp, select_victims, AccessRecord};
use crate::strategy::stats::{CacheStatistics, StatsRecorder};
use crate::strategy::tags::TagIndex;

const BYTES_PER_MB: u64 = 1024 * 1024;

// == Cache Options ==
/// Per-write options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    /// TTL in seconds; `None` or `0` means the manager default
    pub ttl: Option<u64>,
    pub tags: Vec<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// The TTL a write with these options receives.
    pub fn effective_ttl(&self, config: &StrategyConfig) -> u64 {
        self.ttl
            .filter(|ttl| *ttl > 0)
            .unwrap_or(config.default_ttl_seconds)
    }
}

// == Warmup Report ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub loaded: usize,
    pub failed: usize,
}

// == Strategy Manager ==
/// Cloning yields another handle on the same counters and configuration.
pub struct StrategyManager<B: KvBackend> {
    client: CacheClient<B>,
    tags: TagIndex<B>,
    config: Arc<RwLock<StrategyConfig>>,
    stats: Arc<StatsRecorder>,
}

impl<B: KvBackend> Clone for StrategyManager<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            tags: self.tags.clone(),
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B: KvBackend> StrategyManager<B> {
    // == Constructor ==
    pub fn new(client: CacheClient<B>, config: StrategyConfig) -> Self {
        Self {
            tags: TagIndex::new(client.clone()),
            client,
            config: Arc::new(RwLock::new(config)),
            stats: Arc::new(StatsRecorder::new()),
        }
    }

    pub fn client(&self) -> &CacheClient<B> {
        &self.client
    }

    pub fn tag_index(&self) -> &TagIndex<B> {
        &self.tags
    }

    // == Configuration ==
    pub async fn config(&self) -> StrategyConfig {
        self.config.read().await.clone()
    }

    /// Applies `update` to the live configuration.
    pub async fn update_config<F>(&self, update: F)
    where
        F: FnOnce(&mut StrategyConfig),
    {
        let mut config = self.config.write().await;
        update(&mut config);
        info!(config = ?*config, "cache strategy config updated");
    }

    // == Get ==
    /// Looks `key` up without a loader.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config().await;
        self.lookup(key, &config).await
    }

    /// Returns the cached value or loads, stores and returns it.
    ///
    /// Under [`CacheStrategy::Ttl`] a hit whose remaining TTL is below
    /// `refresh_threshold_fraction` of the effective TTL schedules `loader`
    /// in the background and still returns the cached value at once.
    /// Loader failures on a miss are returned as [`CacheError::Loader`]; a
    /// failure to store the loaded value is logged and the value returned.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, loader: F, options: CacheOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let config = self.config().await;
        if let Some(value) = self.lookup::<T>(key, &config).await {
            if config.strategy == CacheStrategy::Ttl {
                self.refresh_if_stale(key, loader, options, &config).await;
            }
            return Ok(value);
        }

        let value = loader().await.map_err(CacheError::Loader)?;
        if let Err(err) = self.set(key, &value, &options).await {
            warn!(key, error = %err, "loaded value could not be cached");
        }
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, config: &StrategyConfig) -> Option<T> {
        match self.client.get::<T>(key).await {
            Some(value) => {
                self.stats.record_hit();
                self.track_access(key, None, config).await;
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    async fn refresh_if_stale<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: CacheOptions,
        config: &StrategyConfig,
    ) where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let remaining = self.client.ttl(key).await;
        let threshold = options.effective_ttl(config) as f64 * config.refresh_threshold_fraction;
        if remaining <= 0 || remaining as f64 >= threshold {
            return;
        }

        debug!(key, remaining, "scheduling refresh-ahead");
        let manager = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match loader().await {
                Ok(value) => match manager.set(&key, &value, &options).await {
                    Ok(()) => debug!(key = %key, "cache refreshed"),
                    Err(err) => error!(key = %key, error = %err, "failed to refresh cache"),
                },
                Err(err) => error!(key = %key, error = %err, "failed to refresh cache"),
            }
        });
    }

    // == Set ==
    /// Writes through the client, registers tags, records access and, when
    /// inline eviction is on, runs [`evict_if_needed`](Self::evict_if_needed).
    pub async fn set<T>(&self, key: &str, value: &T, options: &CacheOptions) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let config = self.config().await;
        let ttl = options.effective_ttl(&config);
        let expiry = Some(ttl).filter(|ttl| *ttl > 0);

        self.client.set(key, value, expiry).await?;
        self.tags
            .attach(key, &options.tags)
            .await
            .inspect_err(|err| error!(key, error = %err, "failed to register cache tags"))?;
        self.track_access(key, Some(ttl), &config).await;

        if config.inline_eviction && config.has_limits() {
            if let Err(err) = self.evict_if_needed().await {
                error!(key, error = %err, "failed to check eviction");
            }
        }
        Ok(())
    }

    /// LRU stamps or LFU counts. The record shares its entry's lifetime:
    /// writes pass the entry's TTL, reads copy whatever the entry has left.
    /// Failures are logged.
    async fn track_access(&self, key: &str, ttl: Option<u64>, config: &StrategyConfig) {
        if !config.strategy.tracks_access() {
            return;
        }
        let ttl = match ttl {
            Some(ttl) => Some(ttl).filter(|t| *t > 0),
            None => match self.client.try_ttl(key).await {
                // entry expired since the read
                Ok(-2) => return,
                Ok(remaining) if remaining < 0 => None,
                Ok(remaining) => Some(remaining.max(1) as u64),
                Err(err) => {
                    error!(key, error = %err, "failed to read entry ttl for access record");
                    return;
                }
            },
        };

        let access = access_key(key);
        let outcome = if config.strategy == CacheStrategy::Lru {
            self.client.set(&access, &access_stamp(), ttl).await
        } else {
            match self.client.incr(&access, 1).await {
                Ok(_) => match ttl {
                    Some(ttl) => self.client.expire(&access, ttl).await.map(|_| ()),
                    None => Ok(()),
                },
                Err(err) => Err(err),
            }
        };
        if let Err(err) = outcome {
            error!(key, error = %err, "failed to record access");
        }
    }

    // == Delete ==
    /// Removes the entry, its tag memberships and its access record.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client.delete(key).await?;
        self.tags.detach(key).await?;
        self.client.delete(&access_key(key)).await?;
        Ok(())
    }

    /// Deletes every entry matching `pattern` (bookkeeping keys excluded),
    /// returning how many keys matched.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let keys: Vec<String> = self
            .client
            .keys(pattern)
            .await
            .inspect_err(|err| error!(pattern, error = %err, "failed to delete caches by pattern"))?
            .into_iter()
            .filter(|k| is_entry_key(k))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.client.delete_many(&keys).await?;
        let access: Vec<String> = keys.iter().map(|k| access_key(k)).collect();
        self.client.delete_many(&access).await?;
        debug!(pattern, count = keys.len(), "caches deleted by pattern");
        Ok(keys.len() as u64)
    }

    /// Deletes every entry carrying `tag`, whatever other tags they carry,
    /// then the tag's own index set. Returns how many keys were tagged.
    pub async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        let keys = self
            .tags
            .keys_for(tag)
            .await
            .inspect_err(|err| error!(tag, error = %err, "failed to delete caches by tag"))?;

        if !keys.is_empty() {
            self.client.delete_many(&keys).await?;
            let access: Vec<String> = keys.iter().map(|k| access_key(k)).collect();
            self.client.delete_many(&access).await?;
            for key in &keys {
                if let Err(err) = self.tags.detach(key).await {
                    warn!(key = %key, error = %err, "failed to clear tag index for deleted key");
                }
            }
        }
        self.tags.drop_tag(tag).await?;

        debug!(tag, count = keys.len(), "caches deleted by tag");
        Ok(keys.len() as u64)
    }

    // == Warmup ==
    /// Loads `keys` in chunks of `concurrency`, each chunk finishing before
    /// the next starts. Per-key failures are logged and skipped.
    pub async fn warmup<T, F, Fut>(&self, keys: Vec<String>, loader: F, concurrency: usize) -> WarmupReport
    where
        T: Serialize + Send + Sync + 'static,
        F: Fn(String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        info!(count = keys.len(), "starting cache warmup");
        let mut report = WarmupReport::default();

        for chunk in keys.chunks(concurrency.max(1)) {
            let mut tasks = JoinSet::new();
            for key in chunk {
                let manager = self.clone();
                let loader = loader.clone();
                let key = key.clone();
                tasks.spawn(async move {
                    let value = match loader(key.clone()).await {
                        Ok(value) => value,
                        Err(err) => {
                            error!(key = %key, error = %err, "failed to warm up cache");
                            return false;
                        }
                    };
                    match manager.set(&key, &value, &CacheOptions::default()).await {
                        Ok(()) => {
                            debug!(key = %key, "cache warmed up");
                            true
                        }
                        Err(err) => {
                            error!(key = %key, error = %err, "failed to warm up cache");
                            false
                        }
                    }
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(true) => report.loaded += 1,
                    Ok(false) => report.failed += 1,
                    Err(err) => {
                        error!(error = %err, "warmup task aborted");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(loaded = report.loaded, failed = report.failed, "cache warmup completed");
        report
    }

    // == Eviction ==
    /// Runs an eviction pass when the entry count exceeds `max_size` or the
    /// store's memory usage exceeds `max_memory_mb`. Returns keys evicted.
    pub async fn evict_if_needed(&self) -> Result<u64> {
        let config = self.config().await;
        if !self.over_limits(&config).await? {
            return Ok(0);
        }
        self.evict_by_access(&config).await
    }

    async fn over_limits(&self, config: &StrategyConfig) -> Result<bool> {
        if let Some(max_size) = config.max_size {
            let count = self
                .client
                .entry_count()
                .await
                .map_err(|err| CacheError::EvictionScan(err.to_string()))?;
            if count > max_size as u64 {
                debug!(count, max_size, "entry count over limit");
                return Ok(true);
            }
        }

        if let Some(max_memory_mb) = config.max_memory_mb {
            let info = self
                .client
                .store_info()
                .await
                .map_err(|err| CacheError::EvictionScan(err.to_string()))?;
            match info.used_memory_bytes {
                Some(used) if used > max_memory_mb * BYTES_PER_MB => {
                    debug!(used, max_memory_mb, "memory usage over limit");
                    return Ok(true);
                }
                Some(_) => {}
                None => warn!("store does not report memory usage, memory limit not enforced"),
            }
        }
        Ok(false)
    }

    /// Evicts the lowest-scored `eviction_batch_fraction` of tracked keys.
    ///
    /// Only records whose entry is still live and counted toward the size
    /// limit take part. Records that do not decode as a score are skipped.
    async fn evict_by_access(&self, config: &StrategyConfig) -> Result<u64> {
        if !config.strategy.tracks_access() {
            warn!(strategy = ?config.strategy, "over limit but strategy keeps no access records");
            return Ok(0);
        }

        let scan_error = |err: CacheError| {
            error!(error = %err, "failed to evict by access order");
            CacheError::EvictionScan(err.to_string())
        };

        let keys = self.client.keys("*").await.map_err(scan_error)?;
        let live: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut records = Vec::new();
        for access in &keys {
            let Some(key) = access.strip_prefix(ACCESS_NAMESPACE) else {
                continue;
            };
            if !is_entry_key(key) {
                continue;
            }
            if !live.contains(key) {
                debug!(key, "skipping access record without entry");
                continue;
            }
            match self.client.try_get::<i64>(access).await {
                Ok(Some(score)) => records.push(AccessRecord::new(key, score)),
                Ok(None) => {}
                Err(err) if err.is_connectivity() => return Err(scan_error(err)),
                Err(err) => warn!(key = %access, error = %err, "skipping undecodable access record"),
            }
        }

        if records.is_empty() {
            warn!(strategy = ?config.strategy, "over limit but no access records to evict by");
            return Ok(0);
        }

        let victims = select_victims(records, config.eviction_batch_fraction);
        let access: Vec<String> = victims.iter().map(|k| access_key(k)).collect();
        self.client.delete_many(&victims).await?;
        self.client.delete_many(&access).await?;
        for key in &victims {
            if let Err(err) = self.tags.detach(key).await {
                warn!(key = %key, error = %err, "failed to clear tag index for evicted key");
            }
        }

        let count = victims.len() as u64;
        self.stats.record_evictions(count);
        info!(count, "cache evicted by access order");
        Ok(count)
    }

    // == Statistics ==
    /// Counters plus the namespace's entry count and store memory usage.
    pub async fn statistics(&self) -> CacheStatistics {
        let mut stats = self.stats.snapshot();
        stats.size = self.client.entry_count().await.unwrap_or_else(|err| {
            error!(error = %err, "failed to count cache entries");
            0
        });
        stats.memory_usage = self.client.store_stats().await.memory_usage;
        stats
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}
