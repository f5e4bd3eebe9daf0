//! Adjuster counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counters updated by the adjuster and the GC sweep.
#[derive(Debug)]
pub struct AdjusterStats {
    /// Scrape batches processed.
    pub batches: AtomicU64,
    /// Points emitted with a resolved start time.
    pub points_adjusted: AtomicU64,
    /// Resets detected.
    pub resets_detected: AtomicU64,
    /// Points dropped during extraction.
    pub points_dropped: AtomicU64,
    /// Points emitted without start time adjustment.
    pub points_passed_through: AtomicU64,
    /// Points older than their cached predecessor.
    pub points_out_of_order: AtomicU64,
    /// Series removed by the GC sweep.
    pub series_evicted: AtomicU64,
    /// Start time for rate calculations.
    pub start_time: Instant,
}

impl Default for AdjusterStats {
    fn default() -> Self {
        Self {
            batches: AtomicU64::new(0),
            points_adjusted: AtomicU64::new(0),
            resets_detected: AtomicU64::new(0),
            points_dropped: AtomicU64::new(0),
            points_passed_through: AtomicU64::new(0),
            points_out_of_order: AtomicU64::new(0),
            series_evicted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

/// Point-in-time copy of [`AdjusterStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub batches: u64,
    pub points_adjusted: u64,
    pub resets_detected: u64,
    pub points_dropped: u64,
    pub points_passed_through: u64,
    pub points_out_of_order: u64,
    pub series_evicted: u64,
    pub uptime_seconds: u64,
}

impl AdjusterStats {
    pub(crate) fn add(counter: &AtomicU64, value: usize) {
        if value > 0 {
            counter.fetch_add(value as u64, Ordering::Relaxed);
        }
    }

    /// Reads every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            points_adjusted: self.points_adjusted.load(Ordering::Relaxed),
            resets_detected: self.resets_detected.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
            points_passed_through: self.points_passed_through.load(Ordering::Relaxed),
            points_out_of_order: self.points_out_of_order.load(Ordering::Relaxed),
            series_evicted: self.series_evicted.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
