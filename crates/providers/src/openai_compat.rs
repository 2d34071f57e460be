//! OpenAI-compatible completion and embedding transport.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions` and `/embeddings`.
//!
//! Function calling uses the `functions` / `function_call` wire fields, which
//! carry exactly one named call per assistant message and report results
//! under the `function` role by name. That keeps the compacted chat valid
//! even when retrieval drops the assistant message a result answers.

use async_trait::async_trait;
use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::ProviderError;
use memloop_core::message::{FunctionCall, Message, Role};
use memloop_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Shared HTTP plumbing for both transports.
#[derive(Clone)]
struct Endpoint {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl Endpoint {
    fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))
    }
}

/// An OpenAI-compatible completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    endpoint: Endpoint,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            endpoint: Endpoint::new(base_url, api_key, timeout)?,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: &str) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, Duration::from_secs(120))
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            Duration::from_secs(120),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }

    /// Convert our Message types to the wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Function => "function".into(),
                },
                content: Some(m.content.clone()),
                name: m.name.clone(),
                function_call: m.function_call.as_ref().map(|fc| ApiFunction {
                    name: fc.name.clone(),
                    arguments: fc.arguments.clone(),
                }),
                tool_calls: None,
            })
            .collect()
    }

    fn to_api_functions(functions: &[ToolDefinition]) -> Vec<ApiFunctionDefinition> {
        functions
            .iter()
            .map(|f| ApiFunctionDefinition {
                name: f.name.clone(),
                description: f.description.clone(),
                parameters: f.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.functions.is_empty() {
            body["functions"] = serde_json::json!(Self::to_api_functions(&request.functions));
        }
        body
    }

    /// Read the reply, taking the first call from either the `function_call`
    /// field or a `tool_calls` list.
    fn from_api_message(message: ApiMessage) -> Message {
        let call = message.function_call.or_else(|| {
            message
                .tool_calls
                .and_then(|calls| calls.into_iter().next())
                .map(|tc| tc.function)
        });
        let content = message.content.unwrap_or_default();
        match call {
            Some(call) => Message {
                function_call: Some(FunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                }),
                ..Message::assistant(content)
            },
            None => Message::assistant(content),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            functions = request.functions.len(),
            "Sending completion request"
        );

        let api_response: ApiResponse = self
            .endpoint
            .post("chat/completions", &Self::request_body(&request))
            .await?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message: Self::from_api_message(choice.message),
            usage,
            model: api_response.model,
        })
    }
}

/// An OpenAI-compatible embedding transport.
pub struct OpenAiEmbedder {
    name: String,
    model: String,
    max_input_tokens: usize,
    max_batch_size: usize,
    endpoint: Endpoint,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let model = model.into();
        Ok(Self {
            name: format!("openai:{model}"),
            model,
            max_input_tokens: 8191,
            max_batch_size: 2048,
            endpoint: Endpoint::new(base_url, api_key, timeout)?,
        })
    }

    /// Override the declared per-input and per-request limits.
    pub fn with_limits(mut self, max_input_tokens: usize, max_batch_size: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    fn vectors_in_order(
        mut data: Vec<EmbeddingData>,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if data.len() != expected {
            return Err(ProviderError::InvalidResponse(format!(
                "requested {expected} embeddings, received {}",
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        let expected = inputs.len();
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %self.model,
            count = expected,
            "Sending embedding request"
        );

        let api_resp: EmbeddingApiResponse = self.endpoint.post("embeddings", &body).await?;
        Self::vectors_in_order(api_resp.data, expected)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunction>,
    #[serde(default, skip_serializing)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
