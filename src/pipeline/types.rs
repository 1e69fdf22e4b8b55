//! Shared types for the reply pipeline.

use serde::{Deserialize, Serialize};

// ── Message outcome ─────────────────────────────────────────────────

/// Terminal state of one message's trip through the pipeline.
///
/// Every message lands in exactly one of these. `Failed` is the
/// generator declining to produce text; `Error` is anything that blew
/// up along the way (mailbox call, generator error). Both fold into
/// the batch `failed` counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Reply generated and sent.
    Success { reply_chars: usize },
    /// Left alone: ignore-list hit or no enabled rule matched.
    Skipped { reason: String },
    /// Generator returned no usable text; nothing was sent.
    Failed { reason: String },
    /// An operation on this message failed outright.
    Error { reason: String },
}

impl MessageOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Error { .. } => "error",
        }
    }
}

// ── Batch result ────────────────────────────────────────────────────

/// Aggregate counters for one batch run.
///
/// `failed` counts both `Failed` and `Error` outcomes, so
/// `processed + skipped + failed == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Messages picked up for this run.
    pub total: usize,
    /// Replies sent.
    pub processed: usize,
    /// Messages skipped by filtering.
    pub skipped: usize,
    /// Generation failures plus per-message errors.
    pub failed: usize,
}

impl BatchResult {
    /// Fold one message outcome into the counters.
    pub fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Success { .. } => self.processed += 1,
            MessageOutcome::Skipped { .. } => self.skipped += 1,
            MessageOutcome::Failed { .. } | MessageOutcome::Error { .. } => self.failed += 1,
        }
    }
}
