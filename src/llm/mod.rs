//! LLM access.
//!
//! Completions run through rig-core against either Anthropic or OpenAI.
//! `RigAdapter` bridges rig's `CompletionModel` trait to the crate's
//! `LlmProvider` trait so the pipeline and tests never see a concrete
//! backend. Reply prompting lives in `generator`.

mod costs;
pub mod generator;
pub mod provider;
mod rig_adapter;

pub use generator::ReplyGenerator;
pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Which hosted model family serves completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Everything needed to construct a provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Build the configured backend as a shareable `LlmProvider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;

            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(config.api_key.expose_secret())
                    .map_err(|e| construct_error("anthropic", e))?;
            let model = client.completion_model(&config.model);
            tracing::info!(model = %config.model, "Anthropic backend ready");
            Ok(Arc::new(RigAdapter::new(model, &config.model)))
        }
        LlmBackend::OpenAi => {
            use rig::providers::openai;

            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(config.api_key.expose_secret())
                    .map_err(|e| construct_error("openai", e))?;
            let model = client.completion_model(&config.model);
            tracing::info!(model = %config.model, "OpenAI backend ready");
            Ok(Arc::new(RigAdapter::new(model, &config.model)))
        }
    }
}

fn construct_error(provider: &str, e: impl std::fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: format!("client construction failed: {e}"),
    }
}
