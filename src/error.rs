//! Error types for mailpilot.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration and rule-file errors. These are the only errors that
/// abort a batch: without a readable rule set no matching decision is
/// possible.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to parse rules file {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(String),

    #[error("No rule with id {0}")]
    RuleNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox collaborator errors. Recorded per message; they never halt a
/// batch.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Connection to {host} failed: {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Failed to send reply to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Failed to update flags on message {uid}: {reason}")]
    FlagUpdateFailed { uid: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("A batch run is already in progress")]
    Busy,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
