//! cachewise - cache strategy and eviction engine over a key-value store
//!
//! Adds policy on top of Redis (or the in-process backend): get-or-load with
//! refresh-ahead, LRU/LFU eviction under size or memory pressure, tag-based
//! invalidation, tiered caches, call wrappers and a distributed lock.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod keys;
pub mod lock;
pub mod strategy;
pub mod tasks;
pub mod time;
pub mod wrappers;

pub use backend::{KvBackend, MemoryBackend, RedisBackend};
pub use client::CacheClient;
pub use config::{AppConfig, CacheStrategy, ClientConfig, HierarchicalConfig, LevelConfig, StrategyConfig};
pub use error::{CacheError, Result};
pub use hierarchy::HierarchicalCacheManager;
pub use keys::{KeyGenerator, KeyGeneratorConfig};
pub use lock::{DistributedLock, LockGuard, LockOptions};
pub use strategy::{CacheOptions, CacheStatistics, StrategyManager, WarmupReport};
pub use tasks::{spawn_eviction_sweep, spawn_expiry_cleanup, spawn_stats_reporter};
pub use wrappers::{EvictAfter, Memoize, PutThrough};
