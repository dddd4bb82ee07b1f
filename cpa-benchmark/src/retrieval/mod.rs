//! Reference-document search tools for the retrieval backend
//!
//! Each document of the corpus becomes one tool. A tool call embeds the query,
//! picks the closest excerpts of that document and has the sub model answer
//! from them.

pub mod corpus;

pub use corpus::{cosine_similarity, load_corpus, Chunk, DocumentIndex};

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::providers::{
    CompletionRequest, Embedder, LLMProvider, Message, ProviderError, ToolSpec,
};

/// Errors from corpus loading or a tool call
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// A search tool the answering model may call
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// Tool description shown to the model
    fn description(&self) -> String;

    async fn search(&self, query: &str) -> Result<String, RetrievalError>;
}

/// Tool name for the `i`-th document
pub fn tool_name(index: usize) -> String {
    format!("doc_{}", index)
}

/// Function definition for a search tool: one string argument, `query`
pub fn tool_spec(index: usize, tool: &dyn DocumentSearch) -> ToolSpec {
    ToolSpec {
        name: tool_name(index),
        description: tool.description(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        }),
    }
}

/// Render ASCII digits full-width (`2023` → `２０２３`)
pub fn fullwidth_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c.to_digit(10) {
            Some(d) if c.is_ascii_digit() => char::from_u32(0xFF10 + d).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Answers a query from the closest excerpts of one document
pub struct DocumentQa {
    document: DocumentIndex,
    embedder: Arc<dyn Embedder>,
    answerer: Arc<dyn LLMProvider>,
    sub_model: String,
    top_k: usize,
    max_tokens: u32,
}

impl DocumentQa {
    pub fn new(
        document: DocumentIndex,
        embedder: Arc<dyn Embedder>,
        answerer: Arc<dyn LLMProvider>,
        sub_model: impl Into<String>,
    ) -> Self {
        Self {
            document,
            embedder,
            answerer,
            sub_model: sub_model.into(),
            top_k: 4,
            max_tokens: 500,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn excerpt_prompt(excerpts: &[&Chunk], query: &str) -> String {
        let context = excerpts
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "以下の抜粋を使って最後の質問に答えてください。答えがわからない場合は、推測せずにわからないと答えてください。\n\n{}\n\n質問: {}\n回答:",
            context, query
        )
    }
}

#[async_trait]
impl DocumentSearch for DocumentQa {
    fn description(&self) -> String {
        format!("{}について使用できます。", fullwidth_digits(&self.document.name))
    }

    async fn search(&self, query: &str) -> Result<String, RetrievalError> {
        let vector = self.embedder.embed(query).await?;
        let excerpts = self.document.top_k(&vector, self.top_k);
        tracing::debug!(
            "{}: {} excerpts for {:?}",
            self.document.name,
            excerpts.len(),
            query
        );

        let request = CompletionRequest::new(
            vec![Message::user(Self::excerpt_prompt(&excerpts, query))],
            self.max_tokens,
        )
        .with_model(&self.sub_model)
        .with_temperature(0.0);

        Ok(self.answerer.complete(&request).await?.content)
    }
}
