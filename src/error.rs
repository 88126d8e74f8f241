//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store unreachable, timed out, or rejected the command
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock could not be acquired
    #[error("Failed to acquire lock: {0}")]
    LockContention(String),

    /// Enumeration of eviction candidates failed mid-sweep
    #[error("Eviction scan failed: {0}")]
    EvictionScan(String),

    /// Caller-supplied loader failed
    #[error("Loader failed: {0}")]
    Loader(#[source] anyhow::Error),

    /// Key rejected before reaching the store
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl CacheError {
    /// Returns true for errors caused by the backing store being unavailable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CacheError::Connectivity(_))
    }
}

// == Conversions ==
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Connectivity(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err = serde_json::from_str::<u64>("not a number").unwrap_err();
        let cache_err: CacheError = err.into();
        assert!(matches!(cache_err, CacheError::Serialization(_)));
    }

    #[test]
    fn test_is_connectivity() {
        assert!(CacheError::Connectivity("down".to_string()).is_connectivity());
        assert!(!CacheError::InvalidKey(String::new()).is_connectivity());
    }

    #[test]
    fn test_lock_contention_message() {
        let err = CacheError::LockContention("checkout".to_string());
        assert_eq!(err.to_string(), "Failed to acquire lock: checkout");
    }
}
