//! The reply pipeline.
//!
//! One batch run:
//! 1. `Mailbox::fetch_unread()` — unread messages, fetch order kept
//! 2. `FilterEngine` — ignore lists, then keyword rules
//! 3. `ReplyGenerator` — rule contexts steer the reply text
//! 4. Send, mark read (configurable), attach the tracking label
//!
//! Outcomes fold into a `BatchResult`; per-message trouble never takes
//! down the batch.

pub mod pacing;
pub mod processor;
pub mod types;

pub use pacing::PacingPolicy;
pub use processor::{BatchProcessor, REPLIED_LABEL};
pub use types::{BatchResult, MessageOutcome};
