//! Eviction helpers: the access clock and victim selection.

use std::sync::atomic::{AtomicI64, Ordering};

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Current time in microseconds, strictly increasing within the process so
/// that back-to-back accesses never tie.
pub fn access_stamp() -> i64 {
    let now = chrono::Utc::now().timestamp_micros();
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

// == Access Record ==
/// One tracked key and its score: an LRU stamp or an LFU count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub key: String,
    pub score: i64,
}

impl AccessRecord {
    pub fn new(key: impl Into<String>, score: i64) -> Self {
        Self {
            key: key.into(),
            score,
        }
    }
}

/// `ceil(fraction × tracked)`, never more than `tracked`.
pub fn batch_size(tracked: usize, fraction: f64) -> usize {
    if tracked == 0 || fraction.is_nan() || fraction <= 0.0 {
        return 0;
    }
    let size = (tracked as f64 * fraction.min(1.0)).ceil() as usize;
    size.clamp(1, tracked)
}

/// Keys to evict: the lowest-scored `batch_size` records (oldest stamp or
/// fewest accesses first). Ties break on key for a stable order.
pub fn select_victims(mut records: Vec<AccessRecord>, fraction: f64) -> Vec<String> {
    let count = batch_size(records.len(), fraction);
    records.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.key.cmp(&b.key)));
    records.into_iter().take(count).map(|r| r.key).collect()
}
