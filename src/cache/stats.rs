//! Cache Statistics Module
//!
//! Tracks cache activity: hits, loads, refreshes and evictions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Values served from the current slot
    pub hits: u64,
    /// Values served from the snapshot taken while a refresh was in flight
    pub stale_hits: u64,
    /// Successful synchronous first loads
    pub loads: u64,
    /// Failed or cancelled synchronous first loads
    pub load_failures: u64,
    /// Successful background refreshes
    pub refreshes: u64,
    /// Failed or timed-out background refreshes
    pub refresh_failures: u64,
    /// Entries removed for being idle
    pub idle_evictions: u64,
    /// Entries removed to respect the size bound
    pub size_evictions: u64,
    /// Current number of entries
    pub total_entries: usize,
}

impl CacheStats {
    // == Hit Rate ==
    /// Fraction of successful gets that did not need a synchronous load.
    ///
    /// Returns 0.0 if nothing has been served yet.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.loads;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Total entries removed by the sweeper.
    pub fn evictions(&self) -> u64 {
        self.idle_evictions + self.size_evictions
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by every cell of a bucket and its sweeper.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    idle_evictions: AtomicU64,
    size_evictions: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_evictions(&self, count: usize) {
        self.idle_evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_size_evictions(&self, count: usize) {
        self.size_evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Reads every counter into a [`CacheStats`].
    pub fn snapshot(&self, total_entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            idle_evictions: self.idle_evictions.load(Ordering::Relaxed),
            size_evictions: self.size_evictions.load(Ordering::Relaxed),
            total_entries,
        }
    }
}
