//! In-Process Backend
//!
//! HashMap storage with lazy TTL expiration, implementing the same contract
//! as the Redis backend. Suitable for single-node deployments and tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use glob::Pattern;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{KvBackend, StoreInfo, StoredEntry, StoredValue};
use crate::error::{CacheError, Result};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Compiles a Redis `KEYS` pattern. `[^..]` becomes `[!..]` and a
/// backslash-escaped metacharacter becomes a one-char class.
fn key_pattern(pattern: &str) -> Result<Pattern> {
    let mut translated = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('?' | '*' | '[' | ']')) => {
                    translated.push('[');
                    translated.push(escaped);
                    translated.push(']');
                }
                Some(other) => translated.push(other),
                None => translated.push('\\'),
            },
            '[' if chars.peek() == Some(&'^') => {
                chars.next();
                translated.push_str("[!");
            }
            other => translated.push(other),
        }
    }
    Pattern::new(&translated)
        .map_err(|e| CacheError::InvalidKey(format!("invalid key pattern '{}': {}", pattern, e)))
}

// == Memory Store ==
/// The lock-protected state of a [`MemoryBackend`].
#[derive(Debug, Default)]
struct MemoryStore {
    entries: HashMap<String, StoredEntry>,
    keyspace_hits: u64,
    keyspace_misses: u64,
}

impl MemoryStore {
    /// Returns the live entry for `key`, dropping it first if expired.
    fn live(&mut self, key: &str) -> Option<&mut StoredEntry> {
        if self.entries.get(key).is_some_and(|entry| entry.is_expired()) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn set_members(&mut self, key: &str) -> Result<Option<&mut HashSet<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(StoredEntry {
                value: StoredValue::Set(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(CacheError::Connectivity(WRONG_TYPE.to_string())),
        }
    }

    fn cleanup_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }

    fn used_memory(&self) -> u64 {
        self.entries
            .iter()
            .map(|(key, entry)| (key.len() + entry.value.size_bytes()) as u64)
            .sum()
    }
}

// == Memory Backend ==
/// In-process implementation of [`KvBackend`].
///
/// `set_available(false)` makes every call fail with a connectivity error,
/// which is how store outages are simulated.
#[derive(Debug)]
pub struct MemoryBackend {
    store: RwLock<MemoryStore>,
    available: AtomicBool,
    connected: AtomicBool,
}

impl MemoryBackend {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            store: RwLock::new(MemoryStore::default()),
            available: AtomicBool::new(true),
            connected: AtomicBool::new(true),
        }
    }

    /// Toggles simulated reachability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        self.store.write().await.cleanup_expired()
    }

    /// Number of entries including expired ones not yet purged.
    pub async fn raw_len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Connectivity(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn connect(&self) -> Result<()> {
        self.check()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let mut store = self.store.write().await;
        let value = match store.live(key) {
            Some(StoredEntry {
                value: StoredValue::Bytes(bytes),
                ..
            }) => Some(bytes.clone()),
            Some(_) => return Err(CacheError::Connectivity(WRONG_TYPE.to_string())),
            None => None,
        };
        if value.is_some() {
            store.keyspace_hits += 1;
        } else {
            store.keyspace_misses += 1;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()> {
        self.check()?;
        let entry = StoredEntry::new(StoredValue::Bytes(value.to_vec()), ttl);
        self.store.write().await.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: u64) -> Result<bool> {
        self.check()?;
        let mut store = self.store.write().await;
        if store.live(key).is_some() {
            return Ok(false);
        }
        let entry = StoredEntry::new(StoredValue::Bytes(value.to_vec()), Some(ttl));
        store.entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let mut store = self.store.write().await;
        let mut removed = 0;
        for key in keys {
            let live = store.live(key).is_some();
            if store.entries.remove(key).is_some() && live {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn del_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        self.check()?;
        let mut store = self.store.write().await;
        let matches = matches!(
            store.live(key),
            Some(StoredEntry { value: StoredValue::Bytes(bytes), .. }) if bytes.as_slice() == expected
        );
        if matches {
            store.entries.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.store.write().await.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        self.check()?;
        let mut store = self.store.write().await;
        match store.live(key) {
            Some(entry) => {
                entry.expire_in(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.check()?;
        let mut store = self.store.write().await;
        Ok(match store.live(key) {
            None => -2,
            Some(entry) => entry.ttl_remaining().map(|s| s as i64).unwrap_or(-1),
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut store = self.store.write().await;
        match store.live(key) {
            Some(entry) => {
                let StoredValue::Bytes(bytes) = &mut entry.value else {
                    return Err(CacheError::Connectivity(WRONG_TYPE.to_string()));
                };
                let current: i64 = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .ok_or_else(|| {
                        CacheError::Connectivity(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })?;
                let next = current.checked_add(delta).ok_or_else(|| {
                    CacheError::Connectivity("ERR increment or decrement would overflow".to_string())
                })?;
                *bytes = next.to_string().into_bytes();
                Ok(next)
            }
            None => {
                let entry = StoredEntry::new(StoredValue::Bytes(delta.to_string().into_bytes()), None);
                store.entries.insert(key.to_string(), entry);
                Ok(delta)
            }
        }
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        let mut store = self.store.write().await;
        if let Some(set) = store.set_members(key)? {
            return Ok(members.iter().filter(|m| set.insert((*m).clone())).count() as u64);
        }
        let set: HashSet<String> = members.iter().cloned().collect();
        let added = set.len() as u64;
        store
            .entries
            .insert(key.to_string(), StoredEntry::new(StoredValue::Set(set), None));
        Ok(added)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        let mut store = self.store.write().await;
        let (removed, now_empty) = match store.set_members(key)? {
            Some(set) => {
                let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
                (removed as u64, set.is_empty())
            }
            None => (0, false),
        };
        // Redis drops empty sets
        if now_empty {
            store.entries.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        let mut store = self.store.write().await;
        Ok(store
            .set_members(key)?
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        let pattern = key_pattern(pattern)?;
        let store = self.store.read().await;
        Ok(store
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn dbsize(&self) -> Result<u64> {
        self.check()?;
        let store = self.store.read().await;
        Ok(store.entries.values().filter(|e| !e.is_expired()).count() as u64)
    }

    async fn info(&self) -> Result<StoreInfo> {
        self.check()?;
        let store = self.store.read().await;
        Ok(StoreInfo {
            used_memory_bytes: Some(store.used_memory()),
            used_memory_human: None,
            keyspace_hits: store.keyspace_hits,
            keyspace_misses: store.keyspace_misses,
        })
    }

    async fn flush(&self) -> Result<()> {
        self.check()?;
        let mut store = self.store.write().await;
        let count = store.entries.len();
        store.entries.clear();
        debug!(count, "in-memory store flushed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
