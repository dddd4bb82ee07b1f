//! Prompt token counting for hosted models

use tiktoken_rs::CoreBPE;

/// Counts prompt tokens with the model's tokenizer. Local models count zero.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    /// Tokenizer for a hosted model; unknown names fall back to `cl100k_base`
    pub fn for_model(model: &str) -> Self {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(bpe),
            Err(_) => {
                tracing::warn!("No tokenizer registered for {}, using cl100k_base", model);
                match tiktoken_rs::cl100k_base() {
                    Ok(bpe) => Some(bpe),
                    Err(e) => {
                        tracing::warn!("cl100k_base unavailable ({}), token counts disabled", e);
                        None
                    }
                }
            }
        };
        Self { bpe }
    }

    pub fn disabled() -> Self {
        Self { bpe: None }
    }

    pub fn count(&self, text: &str) -> u64 {
        self.bpe
            .as_ref()
            .map(|bpe| bpe.encode_with_special_tokens(text).len() as u64)
            .unwrap_or(0)
    }
}
