//! Mailbox access: the I/O seam between the pipeline and a real mail
//! server.
//!
//! The pipeline only sees the `Mailbox` trait — pure I/O, no matching or
//! reply logic. The production implementation speaks IMAP/SMTP; tests
//! substitute an in-memory mock.

pub mod imap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

// ── Email message ───────────────────────────────────────────────────

/// One fetched email, read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Stable identifier: the Message-ID header when present, otherwise
    /// the mailbox UID rendered as a string.
    pub id: String,
    /// Mailbox-internal handle used for flag updates.
    pub uid: u32,
    /// Sender address.
    pub from: String,
    /// Subject line, empty when the header is absent.
    pub subject: String,
    /// Plain-text body (HTML stripped when no text part exists).
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

// ── Mailbox trait ───────────────────────────────────────────────────

/// Mail-server operations the pipeline depends on.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Mailbox name for logging (e.g. "imap").
    fn name(&self) -> &str;

    /// Fetch up to `limit` unread messages, oldest first.
    ///
    /// Fetching must not mark messages read — only `mark_read` does.
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<EmailMessage>, MailboxError>;

    /// Send `body` as a threaded reply to `original`.
    async fn send_reply(&self, original: &EmailMessage, body: &str) -> Result<(), MailboxError>;

    /// Mark a message as read.
    async fn mark_read(&self, message: &EmailMessage) -> Result<(), MailboxError>;

    /// Attach a tracking label to a message.
    async fn add_label(&self, message: &EmailMessage, label: &str) -> Result<(), MailboxError>;
}
