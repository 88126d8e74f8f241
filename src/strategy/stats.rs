//! Cache Statistics Module
//!
//! Tracks hits, misses and evictions for a strategy manager.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Statistics ==
/// Point-in-time view of a manager's counters plus store figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of lookups that found nothing
    pub misses: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Entries removed by size or memory pressure
    pub evictions: u64,
    /// Key count reported by the store
    pub size: u64,
    /// Memory usage reported by the store
    pub memory_usage: String,
}

impl CacheStatistics {
    /// Sums counters across several managers, recomputing the hit rate.
    pub fn aggregate<'a>(all: impl IntoIterator<Item = &'a CacheStatistics>) -> Self {
        let mut total = Self::default();
        for stats in all {
            total.hits += stats.hits;
            total.misses += stats.misses;
            total.evictions += stats.evictions;
            total.size += stats.size;
        }
        total.hit_rate = hit_rate(total.hits, total.misses);
        total.memory_usage = "n/a".to_string();
        total
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses), or 0.0 if no requests have been made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by clones of a manager.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot of the counters; store figures are filled in by the caller.
    pub fn snapshot(&self) -> CacheStatistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStatistics {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: 0,
            memory_usage: "0B".to_string(),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}
