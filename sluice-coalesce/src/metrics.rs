//! Scheduler counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one scheduler instance since it was created.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Batches opened by an `IDLE -> ACCUMULATING` transition
    pub batches_opened: AtomicU64,

    /// Schedule calls merged into an already open batch
    pub requests_coalesced: AtomicU64,

    /// Flushes whose evictions all succeeded
    pub flushes_completed: AtomicU64,

    /// Flushes with at least one failed eviction
    pub flushes_failed: AtomicU64,

    /// Topics successfully evicted across all flushes
    pub topics_evicted: AtomicU64,

    /// Pending batches discarded by cancellation or shutdown
    pub batches_cancelled: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            batches_opened: self.batches_opened.load(Ordering::Relaxed),
            requests_coalesced: self.requests_coalesced.load(Ordering::Relaxed),
            flushes_completed: self.flushes_completed.load(Ordering::Relaxed),
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
            topics_evicted: self.topics_evicted.load(Ordering::Relaxed),
            batches_cancelled: self.batches_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scheduler metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub batches_opened: u64,
    pub requests_coalesced: u64,
    pub flushes_completed: u64,
    pub flushes_failed: u64,
    pub topics_evicted: u64,
    pub batches_cancelled: u64,
}

impl SchedulerSnapshot {
    /// Total schedule calls accepted.
    pub fn requests(&self) -> u64 {
        self.batches_opened + self.requests_coalesced
    }

    /// Flushes attempted, successful or not.
    pub fn flushes(&self) -> u64 {
        self.flushes_completed + self.flushes_failed
    }
}
