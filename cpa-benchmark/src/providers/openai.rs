//! OpenAI-compatible chat completion and embeddings client.
//!
//! Used both for the hosted OpenAI API and for locally hosted models served
//! behind an OpenAI-compatible endpoint (e.g. llama.cpp's `llama-server`).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    CompletionRequest, CompletionResponse, Embedder, LLMProvider, Message, ProviderError,
    ProviderResult, ToolCall, ToolSpec,
};
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_MODEL: &str = "gpt-4o-2024-05-13";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible API client
pub struct OpenAIClient {
    name: String,
    api_key: Option<String>,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
    embedding_model: String,
}

impl OpenAIClient {
    /// Create a client for the hosted OpenAI API
    pub fn new(api_key: String) -> Self {
        Self {
            name: "openai".to_string(),
            api_key: Some(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(500, 200_000)),
            default_model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Create a client for a local OpenAI-compatible server; no API key is sent
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            name: "local".to_string(),
            api_key: None,
            base_url: base_url.into(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(10_000, 10_000_000)),
            default_model: String::new(),
            embedding_model: String::new(),
        }
    }

    /// Create from an environment variable holding the API key
    pub fn from_env(var: &str) -> ProviderResult<Self> {
        let api_key = std::env::var(var)
            .map_err(|_| ProviderError::Config(format!("{} not set", var)))?;
        Ok(Self::new(api_key))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set custom rate limits
    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm, tpm));
        self
    }

    /// Set default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the model used by [`Embedder`] calls
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    /// List model ids visible to the credentials
    pub async fn list_models(&self) -> ProviderResult<Vec<String>> {
        let response = self
            .authorized(self.http_client.get(format!("{}/models", self.base_url)))
            .send()
            .await?;
        let response = check_status(response).await?;
        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    /// For standard models
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    /// For reasoning models (o1, o3) and gpt-5
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    /// Temperature (not supported by reasoning models)
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.tool_calls.iter().map(OpenAIToolCall::from).collect())
        };
        // Assistant turns that only carry tool calls are sent with null content
        let content = if tool_calls.is_some() && msg.content.is_empty() {
            None
        } else {
            Some(msg.content.clone())
        };
        Self {
            role: msg.role.clone(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

#[derive(Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAIFunction,
}

impl From<&ToolSpec> for OpenAITool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            tool_type: "function",
            function: OpenAIFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolCall> for OpenAIToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: function_type(),
            function: OpenAIFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    /// Local servers do not always report usage
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Map a non-success response to a [`ProviderError`]
async fn check_status(response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60)
            * 1000;

        // OpenAI returns 429 both for rate limits and for an exhausted quota
        let body = response.text().await.unwrap_or_default();
        if let Ok(error) = serde_json::from_str::<OpenAIError>(&body) {
            let error_type = error.error.error_type.as_deref().unwrap_or("");
            if error_type == "insufficient_quota" || error.error.message.contains("exceeded your current quota") {
                return Err(ProviderError::Config(format!(
                    "OpenAI quota exceeded: {}",
                    error.error.message
                )));
            }
            tracing::debug!("Rate limited (type={}): {}", error_type, error.error.message);
        }

        return Err(ProviderError::RateLimited {
            retry_after_ms: retry_after,
        });
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<OpenAIError>(&body) {
        Ok(error) => error.error.message,
        Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
    };

    if status == 401 || status == 403 {
        return Err(ProviderError::Config(format!(
            "auth error ({}): {}",
            status.as_u16(),
            message
        )));
    }

    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.acquire().await;

        let start = Instant::now();

        let mut messages: Vec<OpenAIMessage> = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push((&Message::system(system.clone())).into());
        }
        for msg in &request.messages {
            messages.push(msg.into());
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let is_reasoning = model.starts_with("o1") || model.starts_with("o3");
        let uses_completion_tokens = is_reasoning || model.starts_with("gpt-5");

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(OpenAITool::from).collect())
        };

        let body = OpenAIRequest {
            model,
            messages,
            max_tokens: (!uses_completion_tokens).then_some(request.max_tokens),
            max_completion_tokens: uses_completion_tokens.then_some(request.max_tokens),
            temperature: if is_reasoning { None } else { request.temperature },
            seed: request.seed,
            tools,
        };

        let response = self
            .authorized(self.http_client.post(format!("{}/chat/completions", self.base_url)))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let response = check_status(response).await?;
        let api_response: OpenAIResponse = response.json().await?;

        let (input_tokens, output_tokens) = api_response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        self.rate_limiter.record_tokens(input_tokens + output_tokens).await;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model,
            input_tokens,
            output_tokens,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms,
            tool_calls,
        })
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    async fn health_check(&self) -> ProviderResult<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(ProviderError::RateLimited { .. }) => Ok(true),
            Err(e @ ProviderError::Config(_)) => Err(e),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl Embedder for OpenAIClient {
    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        self.rate_limiter.acquire().await;

        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response = self
            .authorized(self.http_client.post(format!("{}/embeddings", self.base_url)))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let mut api_response: EmbeddingResponse = response.json().await?;

        if let Some(usage) = &api_response.usage {
            self.rate_limiter.record_tokens(usage.prompt_tokens).await;
        }
        if api_response.data.len() != texts.len() {
            return Err(ProviderError::Parse(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                api_response.data.len()
            )));
        }

        api_response.data.sort_by_key(|d| d.index);
        Ok(api_response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_message_serializes_null_content() {
        let msg = Message::assistant_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "doc_0".into(),
                arguments: r#"{"query":"監査基準"}"#.into(),
            }],
        );
        let wire = OpenAIMessage::from(&msg);
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "doc_0");
    }

    #[test]
    fn test_tool_result_message_carries_id() {
        let wire = OpenAIMessage::from(&Message::tool_result("call_1", "抜粋"));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["content"], "抜粋");
    }

    #[test]
    fn test_response_with_tool_calls_parses() {
        let body = r#"{
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function",
                                    "function": {"name": "doc_2", "arguments": "{\"query\":\"x\"}"}}]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let parsed: OpenAIResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "doc_2");
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn test_local_client_has_no_key() {
        let client = OpenAIClient::local("http://localhost:8080/v1");
        assert_eq!(client.name(), "local");
        assert!(client.api_key.is_none());
    }
}
