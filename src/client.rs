//! Key-Value Client
//!
//! Namespaced, serializing facade over a [`KvBackend`]. Reads fail open
//! (store errors degrade to a miss, `false` or `-1` and are logged); writes
//! log and return the error.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{KvBackend, StoreInfo};
use crate::config::ClientConfig;
use crate::error::{CacheError, Result};

// == Namespaces ==
/// Forward tag index: `tags:<key>` holds the tags of one entry.
pub const TAGS_NAMESPACE: &str = "tags:";
/// Reverse tag index: `tag:<tag>` holds the keys carrying a tag.
pub const TAG_NAMESPACE: &str = "tag:";
/// Access metadata: `access:<key>` holds an LRU stamp or LFU count.
pub const ACCESS_NAMESPACE: &str = "access:";
/// Lock records: `lock:<name>`.
pub const LOCK_NAMESPACE: &str = "lock:";

const AUXILIARY_NAMESPACES: [&str; 4] =
    [TAGS_NAMESPACE, TAG_NAMESPACE, ACCESS_NAMESPACE, LOCK_NAMESPACE];

pub fn tags_key(key: &str) -> String {
    format!("{}{}", TAGS_NAMESPACE, key)
}

pub fn tag_key(tag: &str) -> String {
    format!("{}{}", TAG_NAMESPACE, tag)
}

pub fn access_key(key: &str) -> String {
    format!("{}{}", ACCESS_NAMESPACE, key)
}

pub fn lock_key(name: &str) -> String {
    format!("{}{}", LOCK_NAMESPACE, name)
}

/// Returns true for keys that hold cache entries rather than bookkeeping.
/// Keys under the reserved namespaces are never counted or pattern-deleted,
/// even when a caller writes one directly.
pub fn is_entry_key(key: &str) -> bool {
    !AUXILIARY_NAMESPACES.iter().any(|ns| key.starts_with(ns))
}

// == Store Stats ==
/// Store-wide figures reported through the client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub key_count: u64,
    pub memory_usage: String,
    pub used_memory_bytes: Option<u64>,
    pub hit_rate: f64,
}

// == Cache Client ==
/// Namespaced client. Cloning is cheap and shares the backend.
pub struct CacheClient<B: KvBackend> {
    backend: Arc<B>,
    prefix: String,
}

impl<B: KvBackend> Clone for CacheClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            prefix: self.prefix.clone(),
        }
    }
}

impl<B: KvBackend> CacheClient<B> {
    // == Constructors ==
    pub fn new(backend: Arc<B>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn from_config(backend: Arc<B>, config: &ClientConfig) -> Self {
        Self::new(backend, config.key_prefix.clone())
    }

    /// A client on the same backend under a nested namespace.
    pub fn namespaced(&self, suffix: &str) -> Self {
        Self::new(Arc::clone(&self.backend), format!("{}{}", self.prefix, suffix))
    }

    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Prepends the namespace.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip_prefix(&self, full_key: String) -> Option<String> {
        full_key.strip_prefix(self.prefix.as_str()).map(str::to_string)
    }

    fn validate(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
        }
        Ok(())
    }

    // == Lifecycle ==
    pub async fn connect(&self) -> Result<()> {
        self.backend.connect().await?;
        info!(backend = self.backend.name(), prefix = %self.prefix, "cache client connected");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.backend.disconnect().await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    // == Set ==
    /// Serializes and stores `value`; `ttl` in seconds.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Self::validate(key)?;
        let payload = serde_json::to_vec(value).map_err(|err| {
            error!(key, error = %err, "failed to serialize cache value");
            CacheError::from(err)
        })?;
        self.backend
            .set(&self.full_key(key), &payload, ttl)
            .await
            .inspect_err(|err| error!(key, error = %err, "failed to set cache"))?;
        debug!(key, ttl = ?ttl, "cache set");
        Ok(())
    }

    // == Get ==
    /// Fetches and decodes `key`. Store failures and undecodable payloads
    /// are reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(CacheError::Serialization(err)) => {
                warn!(key, error = %err, "discarding undecodable cache value");
                None
            }
            Err(err) => {
                error!(key, error = %err, "failed to get cache");
                None
            }
        }
    }

    /// Like [`get`](Self::get) but surfaces errors.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(&self.full_key(key)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .backend
            .del(&[self.full_key(key)])
            .await
            .inspect_err(|err| error!(key, error = %err, "failed to delete cache"))?;
        debug!(key, "cache deleted");
        Ok(removed > 0)
    }

    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let removed = self
            .backend
            .del(&full)
            .await
            .inspect_err(|err| error!(count = keys.len(), error = %err, "failed to delete multiple caches"))?;
        debug!(count = keys.len(), removed, "multiple caches deleted");
        Ok(removed)
    }

    // == Existence & Expiry ==
    pub async fn exists(&self, key: &str) -> bool {
        self.backend
            .exists(&self.full_key(key))
            .await
            .unwrap_or_else(|err| {
                error!(key, error = %err, "failed to check cache existence");
                false
            })
    }

    pub async fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        let updated = self
            .backend
            .expire(&self.full_key(key), ttl)
            .await
            .inspect_err(|err| error!(key, ttl, error = %err, "failed to set cache expiry"))?;
        debug!(key, ttl, "cache expiry set");
        Ok(updated)
    }

    /// Remaining seconds; `-1` when unknown, missing, or without expiry.
    pub async fn ttl(&self, key: &str) -> i64 {
        match self.backend.ttl(&self.full_key(key)).await {
            Ok(ttl) if ttl >= 0 => ttl,
            Ok(_) => -1,
            Err(err) => {
                error!(key, error = %err, "failed to get cache ttl");
                -1
            }
        }
    }

    /// Remaining TTL in the store's convention: `-2` for a missing key, `-1`
    /// for a key without expiry. Errors are returned, not swallowed.
    pub async fn try_ttl(&self, key: &str) -> Result<i64> {
        self.backend.ttl(&self.full_key(key)).await
    }

    // == Counters ==
    pub async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        self.backend
            .incr_by(&self.full_key(key), by)
            .await
            .inspect_err(|err| error!(key, by, error = %err, "failed to increment cache"))
    }

    pub async fn decr(&self, key: &str, by: i64) -> Result<i64> {
        self.backend
            .incr_by(&self.full_key(key), -by)
            .await
            .inspect_err(|err| error!(key, by, error = %err, "failed to decrement cache"))
    }

    // == Sets ==
    pub async fn add_to_set(&self, key: &str, members: &[String]) -> Result<u64> {
        self.backend.sadd(&self.full_key(key), members).await
    }

    pub async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<u64> {
        self.backend.srem(&self.full_key(key), members).await
    }

    pub async fn members(&self, key: &str) -> Result<Vec<String>> {
        self.backend.smembers(&self.full_key(key)).await
    }

    // == Enumeration ==
    /// Keys in this namespace matching `pattern`, returned without prefix.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let full = self.backend.keys(&self.full_key(pattern)).await?;
        Ok(full.into_iter().filter_map(|k| self.strip_prefix(k)).collect())
    }

    /// Number of cache entries in this namespace, bookkeeping keys excluded.
    pub async fn entry_count(&self) -> Result<u64> {
        let keys = self.keys("*").await?;
        Ok(keys.iter().filter(|k| is_entry_key(k)).count() as u64)
    }

    // == Conditional Writes ==
    pub async fn set_if_absent(&self, key: &str, marker: &[u8], ttl: u64) -> Result<bool> {
        Self::validate(key)?;
        self.backend.set_nx(&self.full_key(key), marker, ttl).await
    }

    pub async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.backend.del_if_eq(&self.full_key(key), expected).await
    }

    // == Flush ==
    /// Removes every key in this namespace (the whole database when the
    /// prefix is empty).
    pub async fn flush_all(&self) -> Result<()> {
        if self.prefix.is_empty() {
            self.backend.flush().await?;
        } else {
            let keys = self.backend.keys(&self.full_key("*")).await?;
            self.backend.del(&keys).await?;
        }
        info!(prefix = %self.prefix, "all caches flushed");
        Ok(())
    }

    // == Stats ==
    /// Store-wide statistics; zeroed when the store cannot be reached.
    pub async fn store_stats(&self) -> StoreStats {
        let info = self.backend.info().await;
        let key_count = self.backend.dbsize().await;
        match (info, key_count) {
            (Ok(info), Ok(key_count)) => StoreStats {
                key_count,
                memory_usage: info.memory_usage(),
                used_memory_bytes: info.used_memory_bytes,
                hit_rate: info.hit_rate(),
            },
            (Err(err), _) | (_, Err(err)) => {
                error!(error = %err, "failed to get cache stats");
                StoreStats {
                    memory_usage: "unknown".to_string(),
                    ..StoreStats::default()
                }
            }
        }
    }

    /// Raw store info, surfacing errors (used by memory-based eviction).
    pub async fn store_info(&self) -> Result<StoreInfo> {
        self.backend.info().await
    }
}
