//! Answering backends
//!
//! A backend turns one composed prompt into the model's raw text answer. The
//! variant is chosen once per run from (hosted API model, retrieval mode) and
//! never changes afterwards.

pub mod direct;
pub mod retrieval;

pub use direct::DirectBackend;
pub use retrieval::RetrievalBackend;

use std::sync::Arc;

use crate::providers::{LLMProvider, ProviderError};
use crate::retrieval::DocumentSearch;

/// Errors from answering one prompt
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend variant exists but cannot answer; aborts the whole sweep
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("{0}")]
    Transport(#[from] ProviderError),

    #[error("Retrieval error: {0}")]
    Retrieval(String),
}

impl BackendError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, BackendError::NotImplemented(_))
    }
}

/// Per-run answering settings
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub max_tool_rounds: usize,
}

/// Clients and tools shared by every run of a sweep
#[derive(Clone)]
pub struct BackendResources {
    /// Hosted API client, present once credentials were accepted
    pub api: Option<Arc<dyn LLMProvider>>,
    /// OpenAI-compatible server hosting local models
    pub local: Arc<dyn LLMProvider>,
    /// One search tool per reference document
    pub tools: Vec<Arc<dyn DocumentSearch>>,
}

/// Closed set of backend variants
pub enum AnswerBackend {
    Direct(DirectBackend),
    Retrieval(RetrievalBackend),
}

impl AnswerBackend {
    pub async fn answer(&self, prompt: &str) -> Result<String, BackendError> {
        match self {
            AnswerBackend::Direct(b) => b.answer(prompt).await,
            AnswerBackend::Retrieval(b) => b.answer(prompt).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnswerBackend::Direct(_) => "direct",
            AnswerBackend::Retrieval(_) => "retrieval",
        }
    }
}

/// Build the backend for one run
pub fn create_backend(
    model: &str,
    is_api_model: bool,
    retrieval: bool,
    resources: &BackendResources,
    settings: &BackendSettings,
) -> Result<AnswerBackend, BackendError> {
    let provider = if is_api_model {
        resources.api.clone().ok_or_else(|| {
            BackendError::Transport(ProviderError::Config(format!(
                "{} needs the hosted API but no authenticated client is available",
                model
            )))
        })?
    } else {
        resources.local.clone()
    };

    let backend = match (is_api_model, retrieval) {
        (_, false) => AnswerBackend::Direct(DirectBackend::new(provider, model, settings)),
        (true, true) => {
            if resources.tools.is_empty() {
                return Err(BackendError::Retrieval(
                    "retrieval mode requested but no reference documents are loaded".to_string(),
                ));
            }
            AnswerBackend::Retrieval(RetrievalBackend::new(
                provider,
                model,
                resources.tools.clone(),
                settings,
            ))
        }
        (false, true) => AnswerBackend::Retrieval(RetrievalBackend::unsupported(provider, model)),
    };

    tracing::debug!("Backend for {}: {}", model, backend.kind());
    Ok(backend)
}
