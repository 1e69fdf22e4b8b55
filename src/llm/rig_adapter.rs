//! Bridge from rig-core completion models to `LlmProvider`.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{
    ChatRole, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

/// Wraps any rig `CompletionModel` as an `LlmProvider`.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    cost: (Decimal, Decimal),
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            cost: costs::cost_for_model(model_name),
        }
    }
}

#[async_trait]
impl<M: CompletionModel> LlmProvider for RigAdapter<M> {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.cost
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // Map our flat message list onto rig's shape: system messages
        // fold into the preamble, the final user message becomes the
        // prompt, anything before it is history.
        let mut preamble = String::new();
        let mut messages: Vec<Message> = Vec::new();
        for msg in &request.messages {
            match msg.role {
                ChatRole::System => {
                    if !preamble.is_empty() {
                        preamble.push_str("\n\n");
                    }
                    preamble.push_str(&msg.content);
                }
                ChatRole::User => messages.push(Message::user(msg.content.as_str())),
                ChatRole::Assistant => messages.push(Message::assistant(msg.content.as_str())),
            }
        }
        let prompt = messages.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.model_name.clone(),
            reason: "completion request contained no user message".into(),
        })?;

        let mut builder = self.model.completion_request(prompt);
        if !preamble.is_empty() {
            builder = builder.preamble(preamble);
        }
        if !messages.is_empty() {
            builder = builder.messages(messages);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}
