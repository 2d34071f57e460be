//! BPE token counting with the cl100k vocabulary.

use memloop_core::error::ProviderError;
use memloop_core::token::Tokenizer;
use tiktoken_rs::CoreBPE;

/// Exact token counts for OpenAI's cl100k models.
pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl BpeTokenizer {
    pub fn cl100k() -> Result<Self, ProviderError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ProviderError::NotConfigured(format!("cl100k tokenizer: {e}")))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for BpeTokenizer {
    fn name(&self) -> &str {
        "cl100k"
    }

    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}
