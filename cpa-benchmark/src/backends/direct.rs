//! Single chat completion per prompt

use std::sync::Arc;

use super::{BackendError, BackendSettings};
use crate::providers::{CompletionRequest, LLMProvider, Message};

pub struct DirectBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
}

impl DirectBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, model: &str, settings: &BackendSettings) -> Self {
        Self {
            provider,
            model: model.to_string(),
            system_prompt: settings.system_prompt.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    /// System prompt plus the query, deterministic sampling, text returned as is
    pub async fn answer(&self, prompt: &str) -> Result<String, BackendError> {
        let request = CompletionRequest::new(vec![Message::user(prompt)], self.max_tokens)
            .with_model(&self.model)
            .with_system(&self.system_prompt)
            .with_temperature(0.0)
            .with_seed(0);

        let response = self.provider.complete(&request).await?;
        tracing::debug!(
            "{} answered in {}ms ({} in / {} out tokens)",
            self.model,
            response.latency_ms,
            response.input_tokens,
            response.output_tokens
        );
        Ok(response.content)
    }
}
