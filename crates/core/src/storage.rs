//! Storage trait: hierarchical UTF-8 blob storage.
//!
//! Paths are `/`-separated and relative to the backend's root. Both the raw
//! agent state and every vector Document's two-file payload live here.

use async_trait::async_trait;

use crate::error::MemoryError;

#[async_trait]
pub trait Storage: Send + Sync {
    /// The backend name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Read a blob. Returns `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<String>, MemoryError>;

    /// Write a blob, creating parent directories as needed.
    async fn write(&self, path: &str, contents: &str) -> Result<(), MemoryError>;

    /// List the immediate children of `path`, sorted by name.
    async fn list(&self, path: &str) -> Result<Vec<String>, MemoryError>;

    /// Recursively delete `path`. Returns whether anything was removed.
    async fn delete(&self, path: &str) -> Result<bool, MemoryError>;
}

/// Join two storage path segments with a single `/`.
pub fn join(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        child.to_string()
    } else {
        format!("{base}/{child}")
    }
}
