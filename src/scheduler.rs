//! Poll scheduler — drives batch runs on a timer.
//!
//! Exactly one batch runs at a time. The guard covers both triggers:
//! a timer tick that lands while a manual run is in flight is skipped
//! with a log line, and a manual trigger during a scheduled run gets a
//! busy error back. Overlapping runs would double-reply to the same
//! unread messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Error, SchedulerError};
use crate::pipeline::{BatchProcessor, BatchResult};
use crate::stats::ProcessingStats;

/// Scheduler state reported by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// A batch run is in flight right now.
    pub busy: bool,
    pub poll_interval_secs: u64,
    pub batch_limit: usize,
    /// When the last run finished (successfully or not).
    pub last_run_at: Option<DateTime<Utc>>,
    /// Runs that completed without aborting.
    pub runs_completed: u64,
}

/// Serializes batch runs and keeps run bookkeeping.
pub struct Scheduler {
    processor: Arc<BatchProcessor>,
    stats: Arc<ProcessingStats>,
    poll_interval: Duration,
    batch_limit: usize,
    busy: AtomicBool,
    last_run_at: RwLock<Option<DateTime<Utc>>>,
    runs_completed: AtomicU64,
}

impl Scheduler {
    pub fn new(
        processor: Arc<BatchProcessor>,
        stats: Arc<ProcessingStats>,
        poll_interval: Duration,
        batch_limit: usize,
    ) -> Self {
        Self {
            processor,
            stats,
            poll_interval,
            batch_limit,
            busy: AtomicBool::new(false),
            last_run_at: RwLock::new(None),
            runs_completed: AtomicU64::new(0),
        }
    }

    /// Run one batch immediately, optionally overriding the fetch limit.
    ///
    /// Returns `SchedulerError::Busy` when another run is in flight;
    /// the caller decides whether to retry.
    pub async fn run_now(&self, limit: Option<usize>) -> Result<BatchResult, Error> {
        if !self.try_begin() {
            return Err(SchedulerError::Busy.into());
        }

        let outcome = self.run_batch(limit.unwrap_or(self.batch_limit)).await;
        if outcome.is_ok() {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_run_at.write().await = Some(Utc::now());
        self.busy.store(false, Ordering::Release);

        outcome
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            busy: self.busy.load(Ordering::Acquire),
            poll_interval_secs: self.poll_interval.as_secs(),
            batch_limit: self.batch_limit,
            last_run_at: *self.last_run_at.read().await,
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
        }
    }

    /// Claim the run slot. CAS so two triggers cannot both win.
    fn try_begin(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run_batch(&self, limit: usize) -> Result<BatchResult, Error> {
        let result = self.processor.process_unread(limit).await?;
        self.stats.record_batch(&result);
        Ok(result)
    }
}

/// Spawn the polling loop.
///
/// Fires once immediately, then every `poll_interval`. Returns a
/// `JoinHandle` and shutdown flag; setting the flag stops the loop at
/// its next tick.
pub fn spawn_scheduler(scheduler: Arc<Scheduler>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let interval_secs = scheduler.poll_interval.as_secs();
        info!("Scheduler started — polling every {interval_secs}s");

        let mut tick = tokio::time::interval(scheduler.poll_interval);

        // Run immediately on first tick
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Scheduler shutting down");
                return;
            }

            match scheduler.run_now(None).await {
                Ok(result) => {
                    if result.total > 0 {
                        info!(
                            processed = result.processed,
                            skipped = result.skipped,
                            failed = result.failed,
                            "Scheduled run finished"
                        );
                    }
                }
                Err(Error::Scheduler(SchedulerError::Busy)) => {
                    warn!("Previous batch still running — tick skipped");
                }
                Err(e) => {
                    error!(error = %e, "Scheduled run aborted");
                }
            }
        }
    });

    (handle, shutdown_flag)
}
