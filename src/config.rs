//! Configuration Module
//!
//! Handles loading and managing client, strategy and tier configuration
//! from environment variables (or any serde source).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

// == Client Config ==
/// Connection parameters for the backing store client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Store host name
    pub host: String,
    /// Store port
    pub port: u16,
    /// Optional password
    pub password: Option<String>,
    /// Logical database index
    pub db: Option<i64>,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Defer connecting until `connect` is called
    pub lazy_connect: bool,
    /// Attempts per command before reporting a connectivity error
    pub max_retries_per_request: u32,
}

impl ClientConfig {
    /// Creates a ClientConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_HOST` (default: 127.0.0.1)
    /// - `CACHE_PORT` (default: 6379)
    /// - `CACHE_PASSWORD` (optional)
    /// - `CACHE_DB` (optional)
    /// - `CACHE_KEY_PREFIX` (default: "app:")
    /// - `CACHE_CONNECT_TIMEOUT_MS` (default: 10000)
    /// - `CACHE_LAZY_CONNECT` (default: false)
    /// - `CACHE_MAX_RETRIES` (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("CACHE_HOST").unwrap_or(defaults.host),
            port: env_or("CACHE_PORT", defaults.port),
            password: env::var("CACHE_PASSWORD").ok().filter(|p| !p.is_empty()),
            db: env_opt("CACHE_DB"),
            key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            connect_timeout_ms: env_or("CACHE_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            lazy_connect: env_or("CACHE_LAZY_CONNECT", defaults.lazy_connect),
            max_retries_per_request: env_or("CACHE_MAX_RETRIES", defaults.max_retries_per_request),
        }
    }

    /// Builds the `redis://` connection URL.
    pub fn redis_url(&self) -> String {
        let auth = match &self.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        let db = self.db.map(|db| format!("/{}", db)).unwrap_or_default();
        format!("redis://{}{}:{}{}", auth, self.host, self.port, db)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: None,
            key_prefix: "app:".to_string(),
            connect_timeout_ms: 10_000,
            lazy_connect: false,
            max_retries_per_request: 3,
        }
    }
}

// == Strategy ==
/// Policy applied by a strategy manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Track last access stamps, evict oldest first
    Lru,
    /// Track access counts, evict least used first
    Lfu,
    /// Refresh-ahead when remaining TTL drops under the threshold
    Ttl,
    /// Plain tag-indexed caching
    TagBased,
    /// Used as a tier inside a hierarchical manager
    Hierarchical,
}

impl CacheStrategy {
    /// Returns true when the strategy keeps access records.
    pub fn tracks_access(&self) -> bool {
        matches!(self, CacheStrategy::Lru | CacheStrategy::Lfu)
    }
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(CacheStrategy::Lru),
            "lfu" => Ok(CacheStrategy::Lfu),
            "ttl" => Ok(CacheStrategy::Ttl),
            "tag-based" | "tag_based" | "tag" => Ok(CacheStrategy::TagBased),
            "hierarchical" => Ok(CacheStrategy::Hierarchical),
            other => Err(format!("unknown cache strategy '{}'", other)),
        }
    }
}

// == Strategy Config ==
/// Per-manager policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyConfig {
    pub strategy: CacheStrategy,
    /// Entry count above which eviction runs
    pub max_size: Option<usize>,
    /// Store memory usage (MB) above which eviction runs
    pub max_memory_mb: Option<u64>,
    /// TTL in seconds for writes without an explicit TTL
    pub default_ttl_seconds: u64,
    /// Fraction of the effective TTL under which a hit triggers refresh
    pub refresh_threshold_fraction: f64,
    /// Fraction of tracked keys removed per eviction pass
    pub eviction_batch_fraction: f64,
    /// Run eviction inside `set`; when false the background sweep owns it
    pub inline_eviction: bool,
}

impl StrategyConfig {
    /// Creates a config with the given strategy and default limits.
    pub fn new(strategy: CacheStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Creates a StrategyConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_STRATEGY` (default: lru)
    /// - `CACHE_MAX_SIZE` (optional)
    /// - `CACHE_MAX_MEMORY_MB` (optional)
    /// - `CACHE_DEFAULT_TTL` (default: 3600)
    /// - `CACHE_REFRESH_THRESHOLD` (default: 0.2)
    /// - `CACHE_EVICTION_BATCH` (default: 0.1)
    /// - `CACHE_INLINE_EVICTION` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            strategy: env_or("CACHE_STRATEGY", defaults.strategy),
            max_size: env_opt("CACHE_MAX_SIZE"),
            max_memory_mb: env_opt("CACHE_MAX_MEMORY_MB"),
            default_ttl_seconds: env_or("CACHE_DEFAULT_TTL", defaults.default_ttl_seconds),
            refresh_threshold_fraction: env_or(
                "CACHE_REFRESH_THRESHOLD",
                defaults.refresh_threshold_fraction,
            ),
            eviction_batch_fraction: env_or(
                "CACHE_EVICTION_BATCH",
                defaults.eviction_batch_fraction,
            ),
            inline_eviction: env_or("CACHE_INLINE_EVICTION", defaults.inline_eviction),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_max_memory_mb(mut self, max_memory_mb: u64) -> Self {
        self.max_memory_mb = Some(max_memory_mb);
        self
    }

    pub fn with_default_ttl(mut self, seconds: u64) -> Self {
        self.default_ttl_seconds = seconds;
        self
    }

    pub fn with_refresh_threshold(mut self, fraction: f64) -> Self {
        self.refresh_threshold_fraction = fraction;
        self
    }

    pub fn with_eviction_batch(mut self, fraction: f64) -> Self {
        self.eviction_batch_fraction = fraction;
        self
    }

    pub fn with_inline_eviction(mut self, inline: bool) -> Self {
        self.inline_eviction = inline;
        self
    }

    /// Returns true when any size or memory limit is configured.
    pub fn has_limits(&self) -> bool {
        self.max_size.is_some() || self.max_memory_mb.is_some()
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::Lru,
            max_size: None,
            max_memory_mb: None,
            default_ttl_seconds: 3600,
            refresh_threshold_fraction: 0.2,
            eviction_batch_fraction: 0.1,
            inline_eviction: true,
        }
    }
}

// == Hierarchical Config ==
/// One tier of a hierarchical cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelConfig {
    pub name: String,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub max_size: Option<usize>,
}

impl LevelConfig {
    pub fn new(name: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            name: name.into(),
            ttl_seconds,
            max_size: None,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

/// Ordered tiers, fastest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchicalConfig {
    pub levels: Vec<LevelConfig>,
}

// == App Config ==
/// Configuration for the sweeper binary.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub strategy: StrategyConfig,
    /// Seconds between background eviction sweeps
    pub sweep_interval: u64,
    /// Seconds between statistics log lines
    pub stats_interval: u64,
}

impl AppConfig {
    /// Loads the full binary configuration from the environment.
    ///
    /// Adds `CACHE_SWEEP_INTERVAL` (default: 30) and `CACHE_STATS_INTERVAL`
    /// (default: 60) on top of the client and strategy variables.
    pub fn from_env() -> Self {
        Self {
            client: ClientConfig::from_env(),
            strategy: StrategyConfig::from_env(),
            sweep_interval: env_or("CACHE_SWEEP_INTERVAL", 30),
            stats_interval: env_or("CACHE_STATS_INTERVAL", 60),
        }
    }
}
