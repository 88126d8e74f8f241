//! Integration Tests for the Cache Engine
//!
//! Exercises the public API end to end against the in-process backend.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cachewise::{
    CacheClient, CacheError, CacheOptions, CacheStrategy, DistributedLock, HierarchicalCacheManager,
    HierarchicalConfig, KeyGenerator, LevelConfig, LockOptions, MemoryBackend, StrategyConfig,
    StrategyManager,
};
use serde::{Deserialize, Serialize};
use tokio_test::{assert_err, assert_ok};

// == Helper Functions ==

fn backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new())
}

fn manager_on(backend: &Arc<MemoryBackend>, config: StrategyConfig) -> StrategyManager<MemoryBackend> {
    StrategyManager::new(CacheClient::new(Arc::clone(backend), "app:"), config)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dish {
    id: u32,
    name: String,
    price_cents: u64,
    tags: Vec<String>,
}

fn dish(id: u32) -> Dish {
    Dish {
        id,
        name: format!("dish-{}", id),
        price_cents: 1250,
        tags: vec!["spicy".to_string()],
    }
}

// == Round Trip ==

#[tokio::test]
async fn test_round_trip_then_expiry() {
    let backend = backend();
    let manager = manager_on(&backend, StrategyConfig::default());

    assert_ok!(manager.set("dish:1", &dish(1), &CacheOptions::new().with_ttl(1)).await);
    assert_eq!(manager.get::<Dish>("dish:1").await, Some(dish(1)));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(manager.client().ttl("dish:1").await <= 0);
    assert_eq!(manager.get::<Dish>("dish:1").await, None);
}

#[tokio::test]
async fn test_get_or_load_populates_cache() {
    let backend = backend();
    let manager = manager_on(&backend, StrategyConfig::default());

    let loaded: Dish = manager
        .get_or_load("dish:2", || async { Ok(dish(2)) }, CacheOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded, dish(2));

    let cached: Dish = manager
        .get_or_load("dish:2", || async { anyhow::bail!("loader must not run") }, CacheOptions::default())
        .await
        .unwrap();
    assert_eq!(cached, dish(2));
}

// == Tag Invalidation ==

#[tokio::test]
async fn test_tag_invalidation() {
    let backend = backend();
    let manager = manager_on(&backend, StrategyConfig::new(CacheStrategy::TagBased));
    let tagged = CacheOptions::new().with_tags(["T"]);

    manager.set("k1", &"v1", &tagged).await.unwrap();
    manager.set("k2", &"v2", &tagged).await.unwrap();

    assert_eq!(manager.delete_by_tag("T").await.unwrap(), 2);

    assert_eq!(manager.get::<String>("k1").await, None);
    assert_eq!(manager.get::<String>("k2").await, None);
    assert!(manager.tag_index().keys_for("T").await.unwrap().is_empty());
}

// == Distributed Lock ==

#[tokio::test]
async fn test_lock_mutual_exclusion() {
    let client = CacheClient::new(backend(), "app:");
    let first = DistributedLock::new(client.clone());
    let second = DistributedLock::new(client);

    let (a, b) = tokio::join!(first.acquire("L", 30), second.acquire("L", 30));
    assert!(a ^ b, "exactly one acquire must win");

    assert!(!first.acquire("L", 30).await);
    first.release("L").await;
    assert!(second.acquire("L", 30).await);
}

#[tokio::test]
async fn test_lock_available_after_ttl() {
    let lock = DistributedLock::new(CacheClient::new(backend(), "app:"));

    assert!(lock.acquire("L", 1).await);
    assert!(!lock.acquire("L", 1).await);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(lock.acquire("L", 1).await);
}

#[tokio::test]
async fn test_with_lock_contention() {
    let lock = DistributedLock::new(CacheClient::new(backend(), "app:"));
    assert!(lock.acquire("job", 30).await);

    let result = lock.with_lock("job", LockOptions::default(), || async { 1 }).await;
    assert!(matches!(result, Err(CacheError::LockContention(_))));
}

// == LRU Eviction Ordering ==

#[tokio::test]
async fn test_lru_evicts_untouched_keys_first() {
    let backend = backend();
    let config = StrategyConfig::new(CacheStrategy::Lru)
        .with_max_size(10)
        .with_inline_eviction(false);
    let manager = manager_on(&backend, config);

    for i in 1..=11 {
        manager.set(&format!("k{}", i), &i, &CacheOptions::default()).await.unwrap();
    }
    assert_eq!(manager.get::<i32>("k1").await, Some(1));
    manager.set("k12", &12, &CacheOptions::default()).await.unwrap();

    // 12 tracked, ceil(1.2) = 2 evicted: the two oldest untouched keys
    assert_eq!(manager.evict_if_needed().await.unwrap(), 2);
    assert_eq!(manager.get::<i32>("k2").await, None);
    assert_eq!(manager.get::<i32>("k3").await, None);
    assert_eq!(manager.get::<i32>("k1").await, Some(1));
}

#[tokio::test]
async fn test_lru_inline_eviction_respects_touch() {
    let backend = backend();
    let manager = manager_on(&backend, StrategyConfig::new(CacheStrategy::Lru).with_max_size(10));

    for i in 1..=10 {
        manager.set(&format!("k{}", i), &i, &CacheOptions::default()).await.unwrap();
    }
    assert_eq!(manager.get::<i32>("k1").await, Some(1));
    manager.set("k11", &11, &CacheOptions::default()).await.unwrap();
    manager.set("k12", &12, &CacheOptions::default()).await.unwrap();

    assert_eq!(manager.get::<i32>("k2").await, None);
    assert_eq!(manager.get::<i32>("k1").await, Some(1));
    assert_eq!(manager.statistics().await.size, 10);
}

// == Hierarchical Promotion ==

#[tokio::test]
async fn test_hierarchical_promotion() {
    let client = CacheClient::new(backend(), "app:");
    let config = HierarchicalConfig {
        levels: vec![LevelConfig::new("l1", 2), LevelConfig::new("l2", 60)],
    };
    let hierarchy = HierarchicalCacheManager::from_config(&client, &config, &StrategyConfig::default());

    hierarchy.set("k", &"v").await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(hierarchy.get::<String>("k").await, Some("v".to_string()));

    let l2 = hierarchy.level("l2").unwrap();
    let before = l2.statistics().await;
    assert_eq!(hierarchy.get::<String>("k").await, Some("v".to_string()));
    let after = l2.statistics().await;
    assert_eq!((after.hits, after.misses), (before.hits, before.misses));
}

// == Key Generator ==

#[test]
fn test_key_generator_determinism() {
    let keys = KeyGenerator::default();
    let a = keys.list("users", vec![("status", "active"), ("page", "2")]);
    let b = keys.list("users", vec![("page", "2"), ("status", "active")]);
    let c = keys.list("users", vec![("status", "active"), ("page", "3")]);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("list:users:"));
}

// == Fail-Open Reads ==

/// Collects formatted log lines so tests can assert on them.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_fail_open_read() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = backend();
    let manager = manager_on(&backend, StrategyConfig::default());
    manager.set("k", &1, &CacheOptions::default()).await.unwrap();

    backend.set_available(false);

    assert_eq!(manager.get::<i32>("k").await, None);
    assert!(logs.contents().contains("failed to get cache"));
    assert!(!manager.client().exists("k").await);
    assert_eq!(manager.client().ttl("k").await, -1);
    assert_err!(manager.set("k", &2, &CacheOptions::default()).await);

    backend.set_available(true);
    assert_eq!(manager.get::<i32>("k").await, Some(1));
}
