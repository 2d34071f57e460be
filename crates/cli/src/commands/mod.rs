//! Subcommand implementations.

pub mod config_cmd;
pub mod forget;
pub mod run;
pub mod search;

use std::sync::Arc;

use memloop_config::AppConfig;
use memloop_core::storage::Storage;
use memloop_memory::{ChunkerConfig, FileStorage};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate().map_err(|e| format!("Invalid config: {e}"))?;
    Ok(config)
}

pub fn chunker_config(config: &AppConfig) -> ChunkerConfig {
    ChunkerConfig {
        token_ceiling: config.memory.chunk_token_ceiling,
        chunk_chars: config.memory.chunk_chars,
        overlap_chars: config.memory.overlap_chars,
    }
}

pub fn open_storage(config: &AppConfig) -> Arc<dyn Storage> {
    Arc::new(FileStorage::new(config.memory.storage_dir.clone()))
}
