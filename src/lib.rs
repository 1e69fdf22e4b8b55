//! Mailpilot: rule-filtered AI auto-replies for an IMAP mailbox.

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod rules;
pub mod scheduler;
pub mod stats;
