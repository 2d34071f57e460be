//! Embedding transport abstraction.

use async_trait::async_trait;

use crate::error::ProviderError;

/// Turns a batch of strings into one vector per string.
///
/// Implementations declare their per-input token ceiling and per-request
/// batch size; the vector store validates and splits against these before
/// making any call.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// A human-readable name (e.g., "openai:text-embedding-3-small").
    fn name(&self) -> &str;

    /// Maximum tokens accepted for a single input.
    fn max_input_tokens(&self) -> usize;

    /// Maximum number of inputs accepted in one request.
    fn max_batch_size(&self) -> usize;

    /// Embed `inputs`, returning vectors in the same order.
    async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError>;
}
