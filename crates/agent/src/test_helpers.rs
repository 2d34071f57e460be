//! Shared test helpers.

use std::sync::{Arc, Mutex};

use memloop_core::error::ProviderError;
use memloop_core::message::Message;
use memloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use memloop_core::token::HeuristicTokenizer;
use memloop_memory::testing::VocabularyEmbedder;
use memloop_memory::{ChunkerConfig, InMemoryStorage};

use crate::agent_context::AgentContext;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request. Panics if more calls are made than responses
/// provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let count = requests.len();

        if count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                count,
                responses.len()
            );
        }

        requests.push(request);
        Ok(responses[count].clone())
    }
}

fn respond(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A plain text reply, no function call.
pub fn make_text_response(text: &str) -> ProviderResponse {
    respond(Message::assistant(text))
}

/// A reply that calls `name` with JSON `args`.
pub fn make_function_call_response(name: &str, args: serde_json::Value) -> ProviderResponse {
    respond(Message::function_call(
        "",
        name,
        serde_json::to_string(&args).unwrap(),
    ))
}

/// A reply that calls `name` with raw, possibly malformed, argument text.
pub fn make_raw_call_response(name: &str, arguments: &str) -> ProviderResponse {
    respond(Message::function_call("", name, arguments))
}

/// A fresh context on in-memory storage with the vocabulary embedder.
pub async fn test_context() -> AgentContext {
    AgentContext::open(
        "test",
        Arc::new(InMemoryStorage::new()),
        Arc::new(VocabularyEmbedder::new()),
        Arc::new(HeuristicTokenizer),
        ChunkerConfig::default(),
    )
    .await
    .unwrap()
}
