//! Transport implementations for memloop.
//!
//! Everything here is built from configuration and handed to the agent as
//! trait objects: [`Provider`] for completions, [`EmbeddingProvider`] for
//! vectors, [`Tokenizer`] for budgets.

pub mod openai_compat;
pub mod retry;
pub mod tokenizer;

use std::sync::Arc;
use std::time::Duration;

use memloop_config::{AppConfig, TokenizerKind};
use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::ProviderError;
use memloop_core::provider::Provider;
use memloop_core::token::{HeuristicTokenizer, Tokenizer};
use tracing::info;

pub use openai_compat::{OpenAiCompatProvider, OpenAiEmbedder};
pub use retry::{RetryPolicy, RetryingEmbedder, RetryingProvider};
pub use tokenizer::BpeTokenizer;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.retry.max_attempts,
        Duration::from_millis(config.retry.delay_ms),
    )
}

fn api_key(config: &AppConfig) -> Result<&str, ProviderError> {
    config
        .provider
        .api_key
        .as_deref()
        .ok_or_else(|| ProviderError::NotConfigured("no API key set".into()))
}

/// The completion transport, wrapped in rate-limit retry.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let inner = OpenAiCompatProvider::new(
        "openai",
        &config.provider.base_url,
        api_key(config)?,
        HTTP_TIMEOUT,
    )?;
    info!(base_url = %config.provider.base_url, model = %config.provider.model, "Completion provider ready");
    Ok(Arc::new(RetryingProvider::new(Arc::new(inner), retry_policy(config))))
}

/// The embedding transport, wrapped in rate-limit retry.
pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    let inner = OpenAiEmbedder::new(
        &config.provider.base_url,
        api_key(config)?,
        config.provider.embedding_model.clone(),
        HTTP_TIMEOUT,
    )?
    .with_limits(
        config.provider.embedding_max_input_tokens,
        config.provider.embedding_max_batch_size,
    );
    Ok(Arc::new(RetryingEmbedder::new(Arc::new(inner), retry_policy(config))))
}

/// The tokenizer shared by chunking, budgets and embedding-limit checks.
pub fn build_tokenizer(kind: TokenizerKind) -> Result<Arc<dyn Tokenizer>, ProviderError> {
    Ok(match kind {
        TokenizerKind::Heuristic => Arc::new(HeuristicTokenizer),
        TokenizerKind::Cl100k => Arc::new(BpeTokenizer::cl100k()?),
    })
}
