//! Run counters for a join

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters updated by the joiner while a run is in flight
#[derive(Default)]
pub struct JoinMetrics {
    pub files_scanned: AtomicU64,
    pub clips_opened: AtomicU64,
    pub clips_released: AtomicU64,
    pub files_skipped: AtomicU64,
    pub encode_passes: AtomicU64,
    pub intermediates_written: AtomicU64,
    pub intermediates_deleted: AtomicU64,
    pub cleanup_failures: AtomicU64,
}

impl JoinMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Clips currently open (opened but not yet released)
    pub fn clips_in_flight(&self) -> u64 {
        let opened = self.clips_opened.load(Ordering::Relaxed);
        let released = self.clips_released.load(Ordering::Relaxed);
        opened.saturating_sub(released)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            clips_opened: self.clips_opened.load(Ordering::Relaxed),
            clips_released: self.clips_released.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            encode_passes: self.encode_passes.load(Ordering::Relaxed),
            intermediates_written: self.intermediates_written.load(Ordering::Relaxed),
            intermediates_deleted: self.intermediates_deleted.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub files_scanned: u64,
    pub clips_opened: u64,
    pub clips_released: u64,
    pub files_skipped: u64,
    pub encode_passes: u64,
    pub intermediates_written: u64,
    pub intermediates_deleted: u64,
    pub cleanup_failures: u64,
}

/// Timer for tracking run latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
