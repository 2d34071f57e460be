//! Rate-limit retry: bounded, fixed-delay retry around either transport.
//!
//! Only [`ProviderError::RateLimited`] is retried. Every other failure is
//! returned on the spot, and a rate limit that outlasts the policy's attempts
//! is returned as the final error.

use async_trait::async_trait;
use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::ProviderError;
use memloop_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How many times to try, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero behaves as one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Run `op` until it succeeds, fails with something other than a rate
    /// limit, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_rate_limited() && attempt < attempts => {
                    warn!(
                        transport = %label,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_rate_limited() {
                        warn!(transport = %label, attempts, "Rate limit persisted, giving up");
                    }
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

/// A completion provider that retries rate-limited requests.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.policy
            .run(self.inner.name(), || self.inner.complete(request.clone()))
            .await
    }
}

/// An embedding transport that retries rate-limited batches.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn max_input_tokens(&self) -> usize {
        self.inner.max_input_tokens()
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }

    async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.policy
            .run(self.inner.name(), || self.inner.embed(inputs.clone()))
            .await
    }
}
