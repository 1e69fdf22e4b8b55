//! Lifetime processing counters.
//!
//! One `ProcessingStats` lives for the whole service. Every batch run
//! folds its result in; the management API reads snapshots. Counters
//! reset only on restart.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pipeline::BatchResult;

/// Point-in-time copy of the counters, serialized by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages seen across all batches.
    pub total_seen: u64,
    /// Replies sent.
    pub processed: u64,
    /// Messages skipped by filtering.
    pub skipped: u64,
    /// Failed plus errored messages.
    pub failed: u64,
    /// Batch runs recorded.
    pub batches: u64,
}

/// Atomic counters shared between the scheduler and the API.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    total_seen: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch result into the lifetime counters.
    pub fn record_batch(&self, result: &BatchResult) {
        self.total_seen
            .fetch_add(result.total as u64, Ordering::Relaxed);
        self.processed
            .fetch_add(result.processed as u64, Ordering::Relaxed);
        self.skipped
            .fetch_add(result.skipped as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(result.failed as u64, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_seen: self.total_seen.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}
