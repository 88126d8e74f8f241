//! Eviction Sweep and Statistics Reporter
//!
//! With inline eviction turned off, the sweep is what keeps a manager
//! within its limits: evictions then happen on the sweep interval rather
//! than inside the `set` that crossed the limit.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::backend::KvBackend;
use crate::strategy::StrategyManager;

/// Spawns a task running [`StrategyManager::evict_if_needed`] every
/// `interval_secs`. Failed passes are logged and retried next tick.
pub fn spawn_eviction_sweep<B: KvBackend>(manager: StrategyManager<B>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(interval_secs, "starting eviction sweep task");

        loop {
            tokio::time::sleep(interval).await;

            match manager.evict_if_needed().await {
                Ok(0) => debug!("eviction sweep: within limits"),
                Ok(evicted) => info!(evicted, "eviction sweep evicted entries"),
                Err(err) => error!(error = %err, "eviction sweep failed"),
            }
        }
    })
}

/// Spawns a task logging the manager's statistics every `interval_secs`.
pub fn spawn_stats_reporter<B: KvBackend>(manager: StrategyManager<B>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let stats = manager.statistics().await;
            info!(
                hits = stats.hits,
                misses = stats.misses,
                hit_rate = stats.hit_rate,
                evictions = stats.evictions,
                size = stats.size,
                memory = %stats.memory_usage,
                "cache statistics"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::MemoryBackend;
    use crate::client::CacheClient;
    use crate::config::{CacheStrategy, StrategyConfig};
    use crate::strategy::CacheOptions;

    fn deferred_manager(max_size: usize) -> StrategyManager<MemoryBackend> {
        let client = CacheClient::new(Arc::new(MemoryBackend::new()), "app:");
        let config = StrategyConfig::new(CacheStrategy::Lru)
            .with_max_size(max_size)
            .with_inline_eviction(false);
        StrategyManager::new(client, config)
    }

    #[tokio::test]
    async fn test_sweep_brings_manager_within_limits() {
        let manager = deferred_manager(2);
        for key in ["a", "b", "c"] {
            manager.set(key, &1, &CacheOptions::default()).await.unwrap();
        }
        assert_eq!(manager.statistics().await.size, 3);

        let handle = spawn_eviction_sweep(manager.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stats = manager.statistics().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(manager.get::<i32>("a").await, None);

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_survives_store_outage() {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::new(Arc::clone(&backend), "app:");
        let manager = StrategyManager::new(client, StrategyConfig::default().with_max_size(1));
        backend.set_available(false);

        let handle = spawn_eviction_sweep(manager, 1);
        tokio::time::sleep(Duration::from_millis(1200)).await;

        assert!(!handle.is_finished(), "sweep should keep running after a failed pass");
        handle.abort();
    }

    #[tokio::test]
    async fn test_stats_reporter_can_be_aborted() {
        let handle = spawn_stats_reporter(deferred_manager(10), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished());
    }
}
