//! LLM provider implementations

#[cfg(test)]
pub mod mock;
pub mod openai;
pub mod traits;

pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, Embedder, LLMProvider, Message, ProviderError,
    ProviderResult, ToolCall, ToolSpec,
};

use crate::config::Config;

/// Hosted API client with the configured endpoint, limits and embedding model.
/// Fails when the API key variable is not set.
pub fn create_api_client(config: &Config) -> ProviderResult<OpenAIClient> {
    let pc = &config.provider;
    Ok(OpenAIClient::from_env(&pc.api_key_env)?
        .with_base_url(&pc.base_url)
        .with_rate_limits(pc.rpm, pc.tpm)
        .with_model(&config.sweep.sub_model)
        .with_embedding_model(&config.retrieval.embedding_model))
}

/// Client for models served by the local OpenAI-compatible server
pub fn create_local_client(config: &Config) -> OpenAIClient {
    OpenAIClient::local(&config.local.base_url)
}

/// Create the hosted client and confirm the credentials are accepted
pub async fn authenticate(config: &Config) -> ProviderResult<OpenAIClient> {
    let client = create_api_client(config)?;
    let models = client.list_models().await?;
    tracing::info!(
        "Authenticated against {} ({} models visible)",
        config.provider.base_url,
        models.len()
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_config_error() {
        let mut config = Config::default();
        config.provider.api_key_env = "CPA_BENCHMARK_TEST_KEY_THAT_IS_NOT_SET".to_string();
        assert!(matches!(
            create_api_client(&config),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_local_client_uses_configured_url() {
        let mut config = Config::default();
        config.local.base_url = "http://127.0.0.1:9000/v1".to_string();
        let client = create_local_client(&config);
        assert_eq!(client.name(), "local");
    }
}
