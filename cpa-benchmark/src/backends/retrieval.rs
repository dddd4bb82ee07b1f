//! Tool-calling answer loop over the reference-document tools

use std::sync::Arc;

use super::{BackendError, BackendSettings};
use crate::providers::{CompletionRequest, LLMProvider, Message, ToolCall, ToolSpec};
use crate::retrieval::{tool_name, tool_spec, DocumentSearch};

pub struct RetrievalBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
    tools: Vec<Arc<dyn DocumentSearch>>,
    specs: Vec<ToolSpec>,
    system_prompt: String,
    max_tokens: u32,
    max_tool_rounds: usize,
    /// Local models have no tool-calling support here
    supported: bool,
}

impl RetrievalBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: &str,
        tools: Vec<Arc<dyn DocumentSearch>>,
        settings: &BackendSettings,
    ) -> Self {
        let specs = tools
            .iter()
            .enumerate()
            .map(|(i, t)| tool_spec(i, t.as_ref()))
            .collect();
        Self {
            provider,
            model: model.to_string(),
            tools,
            specs,
            system_prompt: settings.system_prompt.clone(),
            max_tokens: settings.max_tokens,
            max_tool_rounds: settings.max_tool_rounds,
            supported: true,
        }
    }

    /// Retrieval for a locally hosted model; every answer fails as not implemented
    pub fn unsupported(provider: Arc<dyn LLMProvider>, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            tools: Vec::new(),
            specs: Vec::new(),
            system_prompt: String::new(),
            max_tokens: 0,
            max_tool_rounds: 0,
            supported: false,
        }
    }

    /// Let the model call document tools until it gives a final answer
    pub async fn answer(&self, prompt: &str) -> Result<String, BackendError> {
        if !self.supported {
            return Err(BackendError::NotImplemented(format!(
                "retrieval answering for local model {} via {}",
                self.model,
                self.provider.name()
            )));
        }

        let mut messages = vec![Message::user(format!("{}{}", self.system_prompt, prompt))];

        for round in 0..self.max_tool_rounds {
            let request = CompletionRequest::new(messages.clone(), self.max_tokens)
                .with_model(&self.model)
                .with_temperature(0.0)
                .with_tools(self.specs.clone());
            let response = self.provider.complete(&request).await?;

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            tracing::debug!(
                "Round {}: {} tool call(s) from {}",
                round + 1,
                response.tool_calls.len(),
                self.model
            );
            messages.push(Message::assistant_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let output = self.run_tool(call).await?;
                messages.push(Message::tool_result(&call.id, output));
            }
        }

        Err(BackendError::Retrieval(format!(
            "no final answer after {} tool rounds",
            self.max_tool_rounds
        )))
    }

    async fn run_tool(&self, call: &ToolCall) -> Result<String, BackendError> {
        let tool = match (0..self.tools.len()).find(|i| tool_name(*i) == call.name) {
            Some(i) => &self.tools[i],
            None => return Ok(format!("{} is not a valid tool.", call.name)),
        };

        // Arguments should be {"query": "..."}; a bare string is used as the query
        let query = serde_json::from_str::<serde_json::Value>(&call.arguments)
            .ok()
            .and_then(|v| v.get("query").and_then(|q| q.as_str()).map(str::to_string))
            .unwrap_or_else(|| call.arguments.clone());

        tool.search(&query)
            .await
            .map_err(|e| BackendError::Retrieval(format!("{}: {}", call.name, e)))
    }
}
