//! Hierarchical Cache Manager
//!
//! Ordered tiers (fastest first), each a [`StrategyManager`] in its own
//! namespace. Reads walk the tiers and promote hits upward; writes and
//! deletes fan out to every tier.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::backend::KvBackend;
use crate::client::CacheClient;
use crate::config::{HierarchicalConfig, StrategyConfig};
use crate::error::{CacheError, Result};
use crate::strategy::{CacheOptions, CacheStatistics, StrategyManager};

struct Tier<B: KvBackend> {
    name: String,
    manager: StrategyManager<B>,
}

pub struct HierarchicalCacheManager<B: KvBackend> {
    tiers: Vec<Tier<B>>,
}

impl<B: KvBackend> Default for HierarchicalCacheManager<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: KvBackend> HierarchicalCacheManager<B> {
    pub fn new() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Builds one tier per level under `prefix + name + ":"`. Each tier takes
    /// `base` with the level's TTL as its default and the level's size cap.
    pub fn from_config(client: &CacheClient<B>, config: &HierarchicalConfig, base: &StrategyConfig) -> Self {
        let mut hierarchy = Self::new();
        for level in &config.levels {
            let mut tier_config = base.clone().with_default_ttl(level.ttl_seconds);
            tier_config.max_size = level.max_size;
            let tier_client = client.namespaced(&format!("{}:", level.name));
            hierarchy.add_level(level.name.clone(), StrategyManager::new(tier_client, tier_config));
        }
        info!(levels = hierarchy.tiers.len(), "hierarchical cache configured");
        hierarchy
    }

    /// Appends a tier below the existing ones.
    pub fn add_level(&mut self, name: impl Into<String>, manager: StrategyManager<B>) {
        self.tiers.push(Tier {
            name: name.into(),
            manager,
        });
    }

    pub fn level(&self, name: &str) -> Option<&StrategyManager<B>> {
        self.tiers.iter().find(|t| t.name == name).map(|t| &t.manager)
    }

    pub fn level_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name.as_str()).collect()
    }

    // == Read Path ==
    /// First hit wins; the value is copied into every faster tier.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.manager.get::<T>(key).await {
                if index > 0 {
                    self.promote(key, &value, index).await;
                }
                return Some(value);
            }
        }
        None
    }

    async fn promote<T: Serialize>(&self, key: &str, value: &T, found_at: usize) {
        for tier in &self.tiers[..found_at] {
            if let Err(err) = tier.manager.set(key, value, &CacheOptions::default()).await {
                error!(key, level = %tier.name, error = %err, "failed to promote cache entry");
            }
        }
        debug!(key, from = %self.tiers[found_at].name, "cache entry promoted");
    }

    /// Walks the tiers, then calls `loader` on a full miss and writes the
    /// result to every tier.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }
        let value = loader().await.map_err(CacheError::Loader)?;
        if let Err(err) = self.set(key, &value).await {
            error!(key, error = %err, "failed to store loaded value in hierarchy");
        }
        Ok(value)
    }

    // == Write Path ==
    /// Writes to every tier with its own default TTL. Every tier is
    /// attempted; the first error is returned.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let mut first_error = None;
        for tier in &self.tiers {
            if let Err(err) = tier.manager.set(key, value, &CacheOptions::default()).await {
                error!(key, level = %tier.name, error = %err, "failed to set cache level");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut first_error = None;
        for tier in &self.tiers {
            if let Err(err) = tier.manager.delete(key).await {
                error!(key, level = %tier.name, error = %err, "failed to delete cache level");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Empties every tier's namespace.
    pub async fn flush_all(&self) -> Result<()> {
        for tier in &self.tiers {
            tier.manager.client().flush_all().await?;
        }
        Ok(())
    }

    // == Statistics ==
    pub async fn level_statistics(&self) -> Vec<(String, CacheStatistics)> {
        let mut all = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            all.push((tier.name.clone(), tier.manager.statistics().await));
        }
        all
    }

    pub async fn statistics(&self) -> CacheStatistics {
        let levels = self.level_statistics().await;
        CacheStatistics::aggregate(levels.iter().map(|(_, stats)| stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::LevelConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn hierarchy(levels: Vec<LevelConfig>) -> HierarchicalCacheManager<MemoryBackend> {
        let client = CacheClient::new(Arc::new(MemoryBackend::new()), "app:");
        HierarchicalCacheManager::from_config(&client, &HierarchicalConfig { levels }, &StrategyConfig::default())
    }

    fn two_levels() -> HierarchicalCacheManager<MemoryBackend> {
        hierarchy(vec![LevelConfig::new("l1", 1), LevelConfig::new("l2", 60)])
    }

    #[tokio::test]
    async fn test_levels_use_own_namespace_and_ttl() {
        let hierarchy = two_levels();
        hierarchy.set("k", &1).await.unwrap();

        let l1 = hierarchy.level("l1").unwrap();
        let l2 = hierarchy.level("l2").unwrap();
        assert_eq!(l1.client().key_prefix(), "app:l1:");
        assert!(l1.client().ttl("k").await <= 1);
        assert!(l2.client().ttl("k").await > 30);
        assert_eq!(hierarchy.level_names(), vec!["l1", "l2"]);
    }

    #[tokio::test]
    async fn test_promotion_from_lower_level() {
        let hierarchy = two_levels();
        hierarchy.set("k", &"v").await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(hierarchy.get::<String>("k").await, Some("v".to_string()));
        let l2_hits = hierarchy.level("l2").unwrap().statistics().await.hits;
        assert_eq!(l2_hits, 1);

        // served by l1 now
        assert_eq!(hierarchy.get::<String>("k").await, Some("v".to_string()));
        let l2_after = hierarchy.level("l2").unwrap().statistics().await.hits;
        assert_eq!(l2_after, l2_hits);
        assert_eq!(hierarchy.level("l1").unwrap().statistics().await.hits, 1);
    }

    #[tokio::test]
    async fn test_full_miss_loads_into_every_level() {
        let hierarchy = two_levels();
        let value: i32 = hierarchy.get_or_load("k", || async { Ok(9) }).await.unwrap();
        assert_eq!(value, 9);

        for name in ["l1", "l2"] {
            let level = hierarchy.level(name).unwrap();
            assert_eq!(level.get::<i32>("k").await, Some(9));
        }
    }

    #[tokio::test]
    async fn test_delete_fans_out() {
        let hierarchy = two_levels();
        hierarchy.set("k", &1).await.unwrap();
        hierarchy.delete("k").await.unwrap();
        assert_eq!(hierarchy.get::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_aggregated_statistics() {
        let hierarchy = two_levels();
        hierarchy.set("k", &1).await.unwrap();
        hierarchy.get::<i32>("k").await;
        hierarchy.get::<i32>("missing").await;

        let stats = hierarchy.statistics().await;
        assert_eq!(stats.hits, 1);
        // a full miss counts once per level
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 2);
        assert_eq!(hierarchy.level_statistics().await.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_all_spares_other_namespaces() {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::new(Arc::clone(&backend), "app:");
        let config = HierarchicalConfig {
            levels: vec![LevelConfig::new("l1", 60)],
        };
        let hierarchy = HierarchicalCacheManager::from_config(&client, &config, &StrategyConfig::default());

        client.set("outside", &1, None).await.unwrap();
        hierarchy.set("k", &1).await.unwrap();
        hierarchy.flush_all().await.unwrap();

        assert_eq!(hierarchy.get::<i32>("k").await, None);
        assert_eq!(client.get::<i32>("outside").await, Some(1));
    }

    #[tokio::test]
    async fn test_level_max_size_applies() {
        let hierarchy = hierarchy(vec![LevelConfig::new("l1", 60).with_max_size(2)]);
        for key in ["a", "b", "c"] {
            hierarchy.set(key, &1).await.unwrap();
        }
        let l1 = hierarchy.level("l1").unwrap();
        assert_eq!(l1.statistics().await.size, 2);
    }
}
