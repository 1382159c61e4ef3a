//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated without taking the store lock.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Reads that found every selected field.
    pub hits: AtomicU64,
    /// Reads that came back partial.
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    /// Entities removed by the garbage collector.
    pub evictions: AtomicU64,
    /// Observer notifications delivered.
    pub notifications: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, partial: bool) {
        if partial {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Current snapshot of all counters.
    pub fn snapshot(&self, entry_count: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
        }
    }
}

/// Cache statistics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub notifications: u64,
    /// Records currently stored, root included.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
