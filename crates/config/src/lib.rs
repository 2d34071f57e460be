//! Configuration loading, validation, and management for Memloop.
//!
//! Loads configuration from `~/.memloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.memloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion and embedding transport settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Rate-limit retry policy shared by both transports
    #[serde(default)]
    pub retry: RetryConfig,

    /// Vector store and chunking settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Context window budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Function-call loop settings
    #[serde(default)]
    pub agent: AgentLoopConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (falls back to environment variables)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Completion model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token ceiling the embedding endpoint accepts per input
    #[serde(default = "default_embedding_max_input_tokens")]
    pub embedding_max_input_tokens: usize,

    /// Inputs the embedding endpoint accepts per request
    #[serde(default = "default_embedding_max_batch_size")]
    pub embedding_max_batch_size: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_embedding_max_input_tokens() -> usize {
    8191
}
fn default_embedding_max_batch_size() -> usize {
    2048
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            embedding_max_input_tokens: default_embedding_max_input_tokens(),
            embedding_max_batch_size: default_embedding_max_batch_size(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_max_input_tokens", &self.embedding_max_input_tokens)
            .field("embedding_max_batch_size", &self.embedding_max_batch_size)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Which tokenizer to count budgets with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// ~4 characters per token
    #[default]
    Heuristic,
    /// cl100k BPE
    Cl100k,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Root directory for collections and agent state
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Messages whose serialized form exceeds this many tokens are chunked
    #[serde(default = "default_chunk_token_ceiling")]
    pub chunk_token_ceiling: usize,

    /// Characters per chunk
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Characters each chunk repeats from its predecessor's tail
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,

    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

fn default_storage_dir() -> PathBuf {
    AppConfig::config_dir().join("storage")
}
fn default_chunk_token_ceiling() -> usize {
    512
}
fn default_chunk_chars() -> usize {
    1200
}
fn default_overlap_chars() -> usize {
    100
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            chunk_token_ceiling: default_chunk_token_ceiling(),
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            tokenizer: TokenizerKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total context window of the completion model
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,

    /// Tokens held back for the model's reply
    #[serde(default = "default_reserved_for_response")]
    pub reserved_for_response: usize,

    /// Fraction of the remaining budget given to the persistent log
    #[serde(default = "default_persistent_share")]
    pub persistent_share: f32,
}

fn default_window_tokens() -> usize {
    8192
}
fn default_reserved_for_response() -> usize {
    1024
}
fn default_persistent_share() -> f32 {
    0.3
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            reserved_for_response: default_reserved_for_response(),
            persistent_share: default_persistent_share(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Results at least this many characters long are stored as variables
    #[serde(default = "default_save_threshold_chars")]
    pub save_threshold_chars: usize,

    /// Safety cap on loop iterations per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget per function call before cancellation is signalled
    #[serde(default = "default_function_timeout_secs")]
    pub function_timeout_secs: u64,

    /// Store every function result as a variable regardless of size
    #[serde(default)]
    pub force_store_results: bool,
}

fn default_save_threshold_chars() -> usize {
    1250
}
fn default_max_iterations() -> u32 {
    25
}
fn default_function_timeout_secs() -> u64 {
    60
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            save_threshold_chars: default_save_threshold_chars(),
            max_iterations: default_max_iterations(),
            function_timeout_secs: default_function_timeout_secs(),
            force_store_results: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.memloop/config.toml).
    ///
    /// Environment variables take priority:
    /// - `MEMLOOP_API_KEY`, then `OPENAI_API_KEY`
    /// - `MEMLOOP_MODEL`
    /// - `MEMLOOP_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var("MEMLOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("MEMLOOP_MODEL") {
            config.provider.model = model;
        }

        if let Ok(base_url) = std::env::var("MEMLOOP_BASE_URL") {
            config.provider.base_url = base_url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".memloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.embedding_max_input_tokens == 0
            || self.provider.embedding_max_batch_size == 0
        {
            return Err(ConfigError::ValidationError(
                "embedding limits must be greater than zero".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.memory.chunk_chars == 0 || self.memory.overlap_chars >= self.memory.chunk_chars {
            return Err(ConfigError::ValidationError(
                "memory.overlap_chars must be smaller than a non-zero memory.chunk_chars".into(),
            ));
        }

        if self.context.reserved_for_response >= self.context.window_tokens {
            return Err(ConfigError::ValidationError(
                "context.reserved_for_response must be smaller than context.window_tokens".into(),
            ));
        }

        if !(self.context.persistent_share > 0.0 && self.context.persistent_share < 1.0) {
            return Err(ConfigError::ValidationError(
                "context.persistent_share must be between 0 and 1 (exclusive)".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for memloop_core::Error {
    fn from(err: ConfigError) -> Self {
        memloop_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.save_threshold_chars, 1250);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.memory.chunk_chars, config.memory.chunk_chars);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[memory]
chunk_chars = 400
overlap_chars = 40
tokenizer = "cl100k"

[agent]
save_threshold_chars = 2000
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.memory.chunk_chars, 400);
        assert_eq!(config.memory.tokenizer, TokenizerKind::Cl100k);
        assert_eq!(config.agent.save_threshold_chars, 2000);
        assert_eq!(config.agent.max_iterations, 25);
        assert_eq!(config.provider.model, "gpt-4o-mini");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = AppConfig::default();
        config.memory.overlap_chars = config.memory.chunk_chars;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_share_rejected() {
        let mut config = AppConfig::default();
        config.context.persistent_share = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn api_key_is_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("save_threshold_chars"));
    }
}
