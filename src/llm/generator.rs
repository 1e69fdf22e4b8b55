//! Reply generation for matched messages.
//!
//! One tight completion per message: the matched rules' context string
//! steers the reply, the original email rides along truncated. The
//! generator normalizes the completion and hands it back; deciding what
//! an empty reply means is the pipeline's job.

use std::sync::Arc;

use tracing::debug;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mailbox::EmailMessage;

/// Max tokens for a generated reply.
const REPLY_MAX_TOKENS: u32 = 1024;

/// Temperature for reply generation.
const REPLY_TEMPERATURE: f32 = 0.4;

/// Body characters forwarded to the model.
const BODY_PREVIEW_CHARS: usize = 2000;

/// Generates reply text through an injected `LlmProvider`.
pub struct ReplyGenerator {
    llm: Arc<dyn LlmProvider>,
}

impl ReplyGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Generate reply text for a message, steered by the rule context.
    ///
    /// Returns the normalized completion. An `Ok` that is empty after
    /// normalization means the model produced nothing usable — the
    /// caller records that as a failed outcome. No retries here.
    pub async fn generate(
        &self,
        message: &EmailMessage,
        context: &str,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_reply_system_prompt()),
            ChatMessage::user(build_reply_user_prompt(message, context)),
        ])
        .with_temperature(REPLY_TEMPERATURE)
        .with_max_tokens(REPLY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;

        let cost = costs::estimate_cost(
            self.llm.cost_per_token(),
            response.input_tokens,
            response.output_tokens,
        );
        debug!(
            id = %message.id,
            model = %self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %cost,
            "Reply generated"
        );

        Ok(clean_reply(&response.content))
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the reply system prompt.
fn build_reply_system_prompt() -> String {
    "You are an email assistant replying on behalf of the mailbox owner.\n\n\
     Rules:\n\
     - Write the reply body only — no subject line, no headers, no markdown\n\
     - Match the sender's language and keep a polite, professional tone\n\
     - Use the provided context to decide what the reply should address\n\
     - Keep it short: a few sentences, sign off as \"the team\"\n\
     - Never invent commitments, prices, or dates not present in the email"
        .to_string()
}

/// Build the reply user prompt from a message and its rule context.
fn build_reply_user_prompt(message: &EmailMessage, context: &str) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(&format!("Context: {}\n", context));
    prompt.push_str(&format!("From: {}\n", message.from));
    prompt.push_str(&format!("Subject: {}\n", message.subject));

    // Truncated for token efficiency
    let body_preview: String = message.body.chars().take(BODY_PREVIEW_CHARS).collect();
    prompt.push_str(&format!("\nEmail:\n{}", body_preview));

    prompt
}

// ── Response normalization ──────────────────────────────────────────

/// Normalize raw model output into a sendable reply body.
///
/// Strips a wrapping markdown fence and a leading `Subject:` line —
/// models emit both now and then despite instructions.
fn clean_reply(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    if text.starts_with("```") {
        if let Some(newline) = text.find('\n') {
            let inner = text[newline + 1..].trim_end();
            let inner = inner.strip_suffix("```").unwrap_or(inner);
            text = inner.trim().to_string();
        } else {
            // A lone fence line carries no reply
            text = String::new();
        }
    }

    if let Some(rest) = text.strip_prefix("Subject:") {
        match rest.find('\n') {
            Some(newline) => text = rest[newline + 1..].trim().to_string(),
            // Only a subject line means no body at all
            None => text = String::new(),
        }
    }

    text
}
