//! Distributed Lock
//!
//! Mutual exclusion across processes built on `SET key value NX EX ttl`.
//!
//! Two release flavours exist:
//! - [`DistributedLock::release`] deletes the record unconditionally. If the
//!   TTL expired and another holder acquired the lock in the meantime, a late
//!   `release` removes the *new* holder's lock. Callers using
//!   `acquire`/`release` directly carry that risk.
//! - [`LockGuard`] (from [`DistributedLock::lock`] and used by
//!   [`DistributedLock::with_lock`]) stores a unique owner token and releases
//!   with compare-and-delete, so a stale holder cannot evict a newer one.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::backend::KvBackend;
use crate::client::{lock_key, CacheClient};
use crate::error::{CacheError, Result};

const LOCK_MARKER: &[u8] = b"1";

fn owner_token() -> String {
    Uuid::new_v4().to_string()
}

// == Lock Options ==
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Lock record TTL in seconds
    pub ttl: u64,
    /// How long to keep retrying after the first failed attempt
    pub wait: Duration,
    /// Pause between attempts
    pub retry_interval: Duration,
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_wait(mut self, wait: Duration, retry_interval: Duration) -> Self {
        self.wait = wait;
        self.retry_interval = retry_interval;
        self
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: 30,
            wait: Duration::ZERO,
            retry_interval: Duration::from_millis(100),
        }
    }
}

// == Distributed Lock ==
pub struct DistributedLock<B: KvBackend> {
    client: CacheClient<B>,
}

impl<B: KvBackend> Clone for DistributedLock<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<B: KvBackend> DistributedLock<B> {
    pub fn new(client: CacheClient<B>) -> Self {
        Self { client }
    }

    // == Acquire ==
    /// Single attempt. Returns true iff this call created the lock record;
    /// store failures count as not acquired.
    pub async fn acquire(&self, name: &str, ttl: u64) -> bool {
        self.acquire_with(name, LOCK_MARKER, ttl).await
    }

    async fn acquire_with(&self, name: &str, marker: &[u8], ttl: u64) -> bool {
        match self.client.set_if_absent(&lock_key(name), marker, ttl).await {
            Ok(true) => {
                debug!(lock = name, ttl, "lock acquired");
                true
            }
            Ok(false) => {
                debug!(lock = name, "lock not acquired");
                false
            }
            Err(err) => {
                error!(lock = name, error = %err, "failed to acquire lock");
                false
            }
        }
    }

    // == Release ==
    /// Deletes the lock record without checking who holds it.
    pub async fn release(&self, name: &str) {
        match self.client.delete(&lock_key(name)).await {
            Ok(_) => debug!(lock = name, "lock released"),
            Err(err) => error!(lock = name, error = %err, "failed to release lock"),
        }
    }

    // == Try Acquire ==
    /// Retries `acquire` every `retry_interval` until it succeeds or
    /// `timeout` elapses.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: u64,
        timeout: Duration,
        retry_interval: Duration,
    ) -> bool {
        let acquired = self
            .poll(timeout, retry_interval, || self.acquire(name, ttl))
            .await;
        if !acquired {
            warn!(lock = name, timeout_ms = timeout.as_millis() as u64, "lock acquisition timeout");
        }
        acquired
    }

    async fn poll<F, Fut>(&self, wait: Duration, retry_interval: Duration, attempt: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        if attempt().await {
            return true;
        }
        if wait.is_zero() {
            return false;
        }
        let retry = async {
            loop {
                tokio::time::sleep(retry_interval).await;
                if attempt().await {
                    return true;
                }
            }
        };
        tokio::time::timeout(wait, retry).await.unwrap_or(false)
    }

    // == Scoped Lock ==
    /// Acquires a fenced lock, polling up to `options.wait`.
    pub async fn lock(&self, name: &str, options: &LockOptions) -> Result<LockGuard<B>> {
        let token = owner_token();
        let acquired = self
            .poll(options.wait, options.retry_interval, || {
                self.acquire_with(name, token.as_bytes(), options.ttl)
            })
            .await;
        if !acquired {
            return Err(CacheError::LockContention(name.to_string()));
        }
        Ok(LockGuard {
            client: self.client.clone(),
            name: name.to_string(),
            token,
            released: false,
        })
    }

    /// Runs `operation` while holding `name`.
    ///
    /// Fails with [`CacheError::LockContention`] when the lock cannot be
    /// acquired within `options.wait`. The lock is released however the
    /// operation ends, including panics and cancellation.
    pub async fn with_lock<T, F, Fut>(&self, name: &str, options: LockOptions, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.lock(name, &options).await?;
        let output = operation().await;
        guard.release().await;
        Ok(output)
    }
}

// == Lock Guard ==
/// A held, fenced lock. Dropping it without calling [`release`](Self::release)
/// schedules the release on the current runtime.
pub struct LockGuard<B: KvBackend> {
    client: CacheClient<B>,
    name: String,
    token: String,
    released: bool,
}

impl<B: KvBackend> LockGuard<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Releases the lock if this guard still owns it. Returns false when the
    /// record expired or now belongs to someone else.
    pub async fn release(mut self) -> bool {
        self.released = true;
        release_owned(&self.client, &self.name, &self.token).await
    }
}

async fn release_owned<B: KvBackend>(client: &CacheClient<B>, name: &str, token: &str) -> bool {
    match client.delete_if_equals(&lock_key(name), token.as_bytes()).await {
        Ok(true) => {
            debug!(lock = name, "lock released");
            true
        }
        Ok(false) => {
            warn!(lock = name, "lock no longer owned at release");
            false
        }
        Err(err) => {
            error!(lock = name, error = %err, "failed to release lock");
            false
        }
    }
}

impl<B: KvBackend> Drop for LockGuard<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let client = self.client.clone();
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_owned(&client, &name, &token).await;
                });
            }
            Err(_) => warn!(lock = %name, "lock guard dropped outside a runtime, record left to expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    fn lock() -> (Arc<MemoryBackend>, DistributedLock<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let client = CacheClient::new(Arc::clone(&backend), "app:");
        (backend, DistributedLock::new(client))
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (_, lock) = lock();
        let (a, b) = tokio::join!(lock.acquire("L", 30), lock.acquire("L", 30));
        assert!(a ^ b, "exactly one acquire must win");

        assert!(!lock.acquire("L", 30).await);
        lock.release("L").await;
        assert!(lock.acquire("L", 30).await);
    }

    #[test]
    fn test_owner_tokens_are_unique_uuids() {
        let tokens: std::collections::HashSet<String> = (0..100).map(|_| owner_token()).collect();
        assert_eq!(tokens.len(), 100);
        assert!(tokens.iter().all(|t| Uuid::parse_str(t).is_ok()));
    }

    #[tokio::test]
    async fn test_lock_record_layout() {
        let (backend, lock) = lock();
        assert!(lock.acquire("checkout", 30).await);
        assert_eq!(backend.get("app:lock:checkout").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_acquire_after_ttl_expiry() {
        let (_, lock) = lock();
        assert!(lock.acquire("L", 1).await);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(lock.acquire("L", 30).await);
    }

    #[tokio::test]
    async fn test_acquire_fails_closed() {
        let (backend, lock) = lock();
        backend.set_available(false);
        assert!(!lock.acquire("L", 30).await);
    }

    #[tokio::test]
    async fn test_try_acquire_waits_for_release() {
        let (_, lock) = lock();
        assert!(lock.acquire("L", 30).await);

        let holder = lock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            holder.release("L").await;
        });

        let acquired = lock
            .try_acquire("L", 30, Duration::from_secs(2), Duration::from_millis(20))
            .await;
        assert!(acquired);
    }

    #[tokio::test]
    async fn test_try_acquire_times_out() {
        let (_, lock) = lock();
        assert!(lock.acquire("L", 30).await);

        let started = std::time::Instant::now();
        let acquired = lock
            .try_acquire("L", 30, Duration::from_millis(200), Duration::from_millis(50))
            .await;
        assert!(!acquired);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_with_lock_runs_and_releases() {
        let (_, lock) = lock();
        let result = lock
            .with_lock("job", LockOptions::default(), || async { 41 + 1 })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert!(lock.acquire("job", 30).await);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error_value() {
        let (_, lock) = lock();
        let result: Result<std::result::Result<(), String>> = lock
            .with_lock("job", LockOptions::default(), || async { Err("boom".to_string()) })
            .await;
        assert!(result.unwrap().is_err());
        assert!(lock.acquire("job", 30).await);
    }

    #[tokio::test]
    async fn test_with_lock_contention_error() {
        let (_, lock) = lock();
        assert!(lock.acquire("job", 30).await);

        let result = lock.with_lock("job", LockOptions::default(), || async {}).await;
        assert!(matches!(result, Err(CacheError::LockContention(_))));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_panic() {
        let (_, lock) = lock();
        let inner = lock.clone();
        let outcome = tokio::spawn(async move {
            inner
                .with_lock("job", LockOptions::default(), || async {
                    panic!("operation failed");
                })
                .await
        })
        .await;
        assert!(outcome.is_err());

        // Release is scheduled from the guard's drop
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lock.acquire("job", 30).await);
    }

    #[tokio::test]
    async fn test_guard_does_not_release_newer_holder() {
        let (_, lock) = lock();
        let options = LockOptions::default().with_ttl(1);
        let stale = lock.lock("L", &options).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let fresh = lock.lock("L", &LockOptions::default()).await.unwrap();

        assert!(!stale.release().await);
        assert!(!lock.acquire("L", 30).await, "newer holder must keep the lock");
        assert!(fresh.release().await);
    }

    #[tokio::test]
    async fn test_unconditional_release_evicts_newer_holder() {
        let (_, lock) = lock();
        assert!(lock.acquire("L", 1).await);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(lock.acquire("L", 30).await);

        // Late release from the first holder removes the second holder's lock
        lock.release("L").await;
        assert!(lock.acquire("L", 30).await);
    }
}
