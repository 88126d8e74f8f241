//! Stored Entry Module
//!
//! Defines a single slot of the in-process backend with TTL support.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

// == Stored Value ==
/// Either a plain byte string or a set of members, mirroring Redis types.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

impl StoredValue {
    /// Approximate heap footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            StoredValue::Bytes(bytes) => bytes.len(),
            StoredValue::Set(members) => members.iter().map(|m| m.len()).sum(),
        }
    }
}

// == Stored Entry ==
/// A value plus its expiry metadata.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// The stored value
    pub value: StoredValue,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl StoredEntry {
    // == Constructor ==
    /// Creates a new entry with optional TTL in seconds.
    pub fn new(value: StoredValue, ttl_seconds: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            expires_at: ttl_seconds.map(|ttl| now + ttl * 1000),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches the expiration
    /// time, so a fully elapsed TTL is never served.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    /// Resets the expiry to `ttl_seconds` from now.
    pub fn expire_in(&mut self, ttl_seconds: u64) {
        self.expires_at = Some(current_timestamp_ms() + ttl_seconds * 1000);
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    /// Remaining TTL in whole seconds, rounded the way Redis rounds `TTL`.
    pub fn ttl_remaining(&self) -> Option<u64> {
        self.ttl_remaining_ms().map(|ms| (ms + 500) / 1000)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
