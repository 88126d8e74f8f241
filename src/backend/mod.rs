//! Backend Module
//!
//! The backing store contract and its implementations. Backends know raw
//! keys, bytes, sets and TTLs only; namespacing, serialization and policy
//! live above them.

mod entry;
mod memory;
mod redis_store;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use entry::{current_timestamp_ms, StoredEntry, StoredValue};
pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

// == Backend Trait ==
/// Primitives a Redis-compatible store must offer.
///
/// TTLs are in seconds. `ttl` follows Redis conventions: `-2` for a missing
/// key, `-1` for a key without expiry.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Establishes the connection (no-op when already connected).
    async fn connect(&self) -> Result<()>;

    /// Closes the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Round-trips a PING.
    async fn ping(&self) -> Result<()>;

    /// Returns true when the last connection attempt succeeded.
    fn is_ready(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// SET with optional EX.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()>;

    /// SET NX EX; returns true iff the key was created.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: u64) -> Result<bool>;

    /// DEL over many keys; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Deletes `key` only if its value equals `expected`.
    async fn del_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<i64>;

    /// INCRBY (negative deltas decrement).
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// KEYS with a glob pattern; returns full keys.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn dbsize(&self) -> Result<u64>;

    async fn info(&self) -> Result<StoreInfo>;

    /// FLUSHDB
    async fn flush(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

// == Store Info ==
/// Memory and hit counters reported by the store itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreInfo {
    pub used_memory_bytes: Option<u64>,
    pub used_memory_human: Option<String>,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

impl StoreInfo {
    /// Parses the `field:value` lines of a Redis INFO reply.
    pub fn parse(info: &str) -> Self {
        let mut parsed = Self::default();
        for line in info.lines() {
            let Some((field, value)) = line.trim().split_once(':') else {
                continue;
            };
            match field {
                "used_memory" => parsed.used_memory_bytes = value.parse().ok(),
                "used_memory_human" => parsed.used_memory_human = Some(value.to_string()),
                "keyspace_hits" => parsed.keyspace_hits = value.parse().unwrap_or(0),
                "keyspace_misses" => parsed.keyspace_misses = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        parsed
    }

    /// Store-level hit rate, 0.0 when nothing was requested.
    pub fn hit_rate(&self) -> f64 {
        let total = self.keyspace_hits + self.keyspace_misses;
        if total == 0 {
            0.0
        } else {
            self.keyspace_hits as f64 / total as f64
        }
    }

    /// Memory usage for display, "unknown" when not reported.
    pub fn memory_usage(&self) -> String {
        match (&self.used_memory_human, self.used_memory_bytes) {
            (Some(human), _) => human.clone(),
            (None, Some(bytes)) => human_bytes(bytes),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Formats a byte count the way Redis formats `used_memory_human`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.2}{}", value, UNITS[unit])
    }
}
