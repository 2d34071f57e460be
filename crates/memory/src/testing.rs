//! Deterministic embedder for tests.
//!
//! Each distinct lowercase word gets its own dimension the first time it is
//! seen; a text embeds to its word-count vector. Texts sharing no words are
//! orthogonal, and identical texts embed identically, which makes rankings
//! fully predictable without a network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::ProviderError;

const DEFAULT_DIMENSIONS: usize = 256;

pub struct VocabularyEmbedder {
    dimensions: usize,
    max_input_tokens: usize,
    max_batch_size: usize,
    vocabulary: Mutex<HashMap<String, usize>>,
    batch_sizes: Mutex<Vec<usize>>,
    calls: AtomicUsize,
}

impl Default for VocabularyEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl VocabularyEmbedder {
    pub fn new() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            max_input_tokens: 8191,
            max_batch_size: 64,
            vocabulary: Mutex::new(HashMap::new()),
            batch_sizes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_max_input_tokens(mut self, limit: usize) -> Self {
        self.max_input_tokens = limit;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Size of every batch received, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }

    fn vectorize(&self, text: &str, vocabulary: &mut HashMap<String, usize>) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let next = vocabulary.len();
            let slot = *vocabulary.entry(word.to_lowercase()).or_insert(next);
            vector[slot % self.dimensions] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    fn name(&self) -> &str {
        "vocabulary"
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.batch_sizes.lock() {
            sizes.push(inputs.len());
        }
        let mut vocabulary = self
            .vocabulary
            .lock()
            .map_err(|_| ProviderError::InvalidResponse("vocabulary lock poisoned".into()))?;
        Ok(inputs
            .iter()
            .map(|text| self.vectorize(text, &mut vocabulary))
            .collect())
    }
}
