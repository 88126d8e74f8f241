//! Redis Backend
//!
//! Talks to a Redis-compatible server through a reconnecting
//! `ConnectionManager`, with a connect timeout and bounded per-command
//! retries on transient I/O failures.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::{KvBackend, StoreInfo};
use crate::config::ClientConfig;
use crate::error::{CacheError, Result};

/// Deletes KEYS[1] only when it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

// == Redis Backend ==
pub struct RedisBackend {
    client: Client,
    config: ClientConfig,
    connection: RwLock<Option<ConnectionManager>>,
    ready: AtomicBool,
    compare_and_delete: Script,
}

impl RedisBackend {
    // == Constructor ==
    /// Creates the backend and, unless `lazy_connect` is set, connects.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::open(config.redis_url())?;
        let backend = Self {
            client,
            config,
            connection: RwLock::new(None),
            ready: AtomicBool::new(false),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
        };
        if !backend.config.lazy_connect {
            backend.connect().await?;
        }
        Ok(backend)
    }

    async fn open(&self) -> Result<ConnectionManager> {
        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.client.get_connection_manager()).await {
            Ok(Ok(manager)) => Ok(manager),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(CacheError::Connectivity(format!(
                "connect to {}:{} timed out after {:?}",
                self.config.host, self.config.port, timeout
            ))),
        }
    }

    /// Returns a handle to the shared connection, connecting on first use.
    async fn connection(&self) -> Result<ConnectionManager> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }
        self.connect().await?;
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| CacheError::Connectivity("not connected".to_string()))
    }

    /// Runs `op`, retrying transient failures up to `max_retries_per_request`.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let attempts = self.config.max_retries_per_request.max(1);
        let mut attempt = 1;
        loop {
            let conn = self.connection().await?;
            match op(conn).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && is_transient(&err) => {
                    warn!(attempt, error = %err, "redis command failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => {
                    if is_transient(&err) {
                        self.ready.store(false, Ordering::SeqCst);
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn is_transient(err: &RedisError) -> bool {
    err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.connection.write().await;
        if slot.is_some() {
            return Ok(());
        }
        match self.open().await {
            Ok(manager) => {
                *slot = Some(manager);
                self.ready.store(true, Ordering::SeqCst);
                info!(host = %self.config.host, port = self.config.port, db = ?self.config.db, "redis connected");
                Ok(())
            }
            Err(err) => {
                self.ready.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        // Dropping the last manager handle closes the multiplexed connection
        self.connection.write().await.take();
        self.ready.store(false, Ordering::SeqCst);
        info!("redis disconnected");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let reply: String = self
            .run(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        self.ready.store(true, Ordering::SeqCst);
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Connectivity(format!("unexpected PING reply '{}'", reply)))
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run(|mut conn| async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<()> {
        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl);
            }
            cmd.query_async(&mut conn).await
        })
        .await
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: u64) -> Result<bool> {
        self.run(|mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut conn)
                .await
                .map(|reply: Option<String>| reply.is_some())
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run(|mut conn| async move { conn.del(keys.to_vec()).await })
            .await
    }

    async fn del_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let script = &self.compare_and_delete;
        self.run(|mut conn| async move {
            script
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await
                .map(|deleted: i64| deleted == 1)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run(|mut conn| async move { conn.exists(key).await }).await
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        self.run(|mut conn| async move {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl)
                .query_async(&mut conn)
                .await
                .map(|updated: i64| updated == 1)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.run(|mut conn| async move { redis::cmd("TTL").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.run(|mut conn| async move { conn.incr(key, delta).await }).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.run(|mut conn| async move { conn.sadd(key, members.to_vec()).await })
            .await
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.run(|mut conn| async move { conn.srem(key, members.to_vec()).await })
            .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run(|mut conn| async move { conn.smembers(key).await }).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.run(|mut conn| async move { conn.keys(pattern).await }).await
    }

    async fn dbsize(&self) -> Result<u64> {
        self.run(|mut conn| async move { redis::cmd("DBSIZE").query_async(&mut conn).await })
            .await
    }

    async fn info(&self) -> Result<StoreInfo> {
        let raw: String = self
            .run(|mut conn| async move { redis::cmd("INFO").query_async(&mut conn).await })
            .await?;
        Ok(StoreInfo::parse(&raw))
    }

    async fn flush(&self) -> Result<()> {
        self.run(|mut conn| async move { redis::cmd("FLUSHDB").query_async(&mut conn).await })
            .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
