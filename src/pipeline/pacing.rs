//! Pacing between messages in a batch.

use std::time::Duration;

/// Delay inserted between consecutive messages in a batch run.
///
/// The gap applies strictly between messages: a batch of one sleeps
/// never, and nothing sleeps after the last message. This keeps
/// outbound traffic below provider rate limits without stretching
/// small batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingPolicy {
    /// Back to back, no delay.
    None,
    /// Fixed gap between consecutive messages.
    FixedDelay(Duration),
    /// Cap throughput at this many messages per minute.
    PerMinute(u32),
}

impl PacingPolicy {
    /// The gap to insert before the next message, if any.
    pub fn gap(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::FixedDelay(d) if d.is_zero() => None,
            Self::FixedDelay(d) => Some(*d),
            Self::PerMinute(0) => None,
            Self::PerMinute(n) => Some(Duration::from_secs_f64(60.0 / f64::from(*n))),
        }
    }

    /// Sleep for the configured gap.
    pub async fn pause(&self) {
        if let Some(gap) = self.gap() {
            tokio::time::sleep(gap).await;
        }
    }
}
