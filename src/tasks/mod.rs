//! Background Tasks Module
//!
//! Periodic work that runs alongside the cache.
//!
//! # Tasks
//! - Eviction sweep: runs the size/memory eviction check on an interval
//! - Statistics reporter: logs a manager's statistics on an interval
//! - Expiry cleanup: purges expired entries from the in-process backend

mod cleanup;
mod sweep;

pub use cleanup::spawn_expiry_cleanup;
pub use sweep::{spawn_eviction_sweep, spawn_stats_reporter};
