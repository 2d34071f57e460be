//! File-based storage backend.
//!
//! Maps each storage path onto a file under a root directory. Collections use
//! one subdirectory per Document, so the on-disk layout is human-inspectable:
//!
//! ```text
//! <root>/<context>/temporary/00000003/vector.json
//! <root>/<context>/temporary/00000003/document.json
//! ```

use async_trait::async_trait;
use memloop_core::error::MemoryError;
use memloop_core::storage::Storage;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A storage backend rooted at a local directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a backend rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "File storage opened");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage path, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, MemoryError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(MemoryError::Storage(format!(
                "Path '{path}' escapes the storage root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> MemoryError {
    MemoryError::Storage(format!("Failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl Storage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, path: &str) -> Result<Option<String>, MemoryError> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &full, e)),
        }
    }

    async fn write(&self, path: &str, contents: &str) -> Result<(), MemoryError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| io_error("write", &full, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, MemoryError> {
        let full = self.resolve(path)?;
        let mut dir = match tokio::fs::read_dir(&full).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list", &full, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list", &full, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, path: &str) -> Result<bool, MemoryError> {
        let full = self.resolve(path)?;
        let metadata = match tokio::fs::metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_error("inspect", &full, e)),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        }
        .map_err(|e| io_error("delete", &full, e))?;

        debug!(path = %full.display(), "Deleted from file storage");
        Ok(true)
    }
}
