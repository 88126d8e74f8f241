//! Strategy Module
//!
//! Caching policies layered over [`CacheClient`](crate::client::CacheClient):
//! access tracking, eviction, tag invalidation and statistics.

mod eviction;
mod manager;
mod stats;
mod tags;

#[cfg(test)]
mod property_tests;

pub use eviction::{access_stamp, batch_size, select_victims, AccessRecord};
pub use manager::{CacheOptions, StrategyManager, WarmupReport};
pub use stats::{hit_rate, CacheStatistics, StatsRecorder};
pub use tags::TagIndex;
