//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::PacingPolicy;

/// Tunables for the reply service, read from `MAILPILOT_*` variables.
///
/// Mail server settings live separately in
/// [`EmailSettings`](crate::mailbox::imap::EmailSettings).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the JSON rules file.
    pub rules_path: PathBuf,
    /// Gap between scheduled batch runs.
    pub poll_interval: Duration,
    /// Maximum messages fetched per run.
    pub batch_limit: usize,
    /// Pacing between consecutive messages in a run.
    pub pacing: PacingPolicy,
    /// Mark messages read after a successful reply.
    pub mark_as_read: bool,
    /// Management API port.
    pub http_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("rules.json"),
            poll_interval: Duration::from_secs(300), // 5 minutes
            batch_limit: 10,
            pacing: PacingPolicy::FixedDelay(Duration::from_millis(500)),
            mark_as_read: true,
            http_port: 8080,
        }
    }
}

impl ServiceConfig {
    /// Build the config from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let rules_path = std::env::var("MAILPILOT_RULES_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.rules_path);

        let poll_interval_secs: u64 = std::env::var("MAILPILOT_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.poll_interval.as_secs());

        let batch_limit: usize = std::env::var("MAILPILOT_BATCH_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch_limit);

        let per_minute: Option<u32> = std::env::var("MAILPILOT_PACING_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok());
        let pacing_ms: u64 = std::env::var("MAILPILOT_PACING_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500);

        let mark_as_read: bool = std::env::var("MAILPILOT_MARK_AS_READ")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.mark_as_read);

        let http_port: u16 = std::env::var("MAILPILOT_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port);

        Self {
            rules_path,
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_limit,
            pacing: pacing_policy(per_minute, pacing_ms),
            mark_as_read,
            http_port,
        }
    }
}

/// Map pacing variables onto a policy. A per-minute cap wins over the
/// fixed delay; a zero delay disables pacing.
fn pacing_policy(per_minute: Option<u32>, delay_ms: u64) -> PacingPolicy {
    match per_minute {
        Some(n) => PacingPolicy::PerMinute(n),
        None if delay_ms == 0 => PacingPolicy::None,
        None => PacingPolicy::FixedDelay(Duration::from_millis(delay_ms)),
    }
}
