//! Error types for the Memloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! The taxonomy maps onto how the function-call loop treats a failure:
//! argument and execution errors are reported in-band and the loop keeps
//! going, while transport, data, and configuration errors end the turn.

use thiserror::Error;

/// The top-level error type for all Memloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory / vector store errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent loop errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the loop may report this error in-band and keep going.
    ///
    /// Only argument and execution failures are recoverable. Everything else
    /// (transport, data, configuration) ends the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Tool(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a bounded retry is allowed for this failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted vector or document payload is missing. Never retried.
    #[error("Missing data at {path}")]
    MissingData { path: String },

    #[error("Corrupt data at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// An input exceeds the embedding provider's token ceiling. Raised before
    /// any network call is made.
    #[error("Input #{index} has {tokens} tokens, exceeding the provider limit of {limit}")]
    InputTooLong {
        index: usize,
        tokens: usize,
        limit: usize,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Iteration limit of {0} reached before the task finished")]
    IterationLimit(u32),

    #[error("The function catalog is empty")]
    NoFunctionCatalog,
}
