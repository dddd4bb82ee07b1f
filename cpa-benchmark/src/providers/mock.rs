//! In-memory providers for tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::*;
use crate::runner::RateLimiter;

impl From<&str> for CompletionResponse {
    fn from(content: &str) -> Self {
        CompletionResponse::text(content)
    }
}

/// Replays a fixed list of responses in order and records every request
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderResult<CompletionResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
    rate_limiter: Arc<RateLimiter>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ProviderResult<CompletionResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            rate_limiter: Arc::new(RateLimiter::new(10_000, 10_000_000)),
        }
    }

    /// Answer every request with the same text
    pub fn repeating(text: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(text.into())).collect())
    }

    /// Sleep before each response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Response asking for one tool call
pub fn tool_call_response(id: &str, tool: &str, query: &str) -> CompletionResponse {
    let mut response = CompletionResponse::text("");
    response.finish_reason = "tool_calls".to_string();
    response.tool_calls = vec![ToolCall {
        id: id.to_string(),
        name: tool.to_string(),
        arguments: serde_json::json!({ "query": query }).to_string(),
    }];
    response
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Parse("script exhausted".to_string())))
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    async fn health_check(&self) -> ProviderResult<bool> {
        Ok(true)
    }
}

/// Embeds every text to the same vector
pub struct StaticEmbedder {
    vector: Vec<f32>,
}

impl StaticEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
}
