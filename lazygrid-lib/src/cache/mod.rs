//! Row-range caching
//!
//! [`BlockCache`] keeps fetched rows as ascending, non-overlapping blocks and
//! decides which part of a request still needs I/O. [`CachedFrame`] wraps a
//! data frame with one block cache per sort order, keyed by column.

mod blocks;
mod frame;

pub use blocks::*;
pub use frame::*;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Cumulative hit/miss counters.
///
/// For observability only; nothing in the engine reads them back.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests served without any I/O.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Requests that dispatched or waited for I/O.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of requests served from cache, `None` before any request.
    pub fn hit_ratio(&self) -> Option<f64> {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} hits, {} misses", self.hits(), self.misses())
    }
}
