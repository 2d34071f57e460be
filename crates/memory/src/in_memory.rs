//! In-memory storage backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use memloop_core::error::MemoryError;
use memloop_core::storage::Storage;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// A storage backend that keeps blobs in a sorted map keyed by path.
#[derive(Default)]
pub struct InMemoryStorage {
    blobs: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn dir_prefix(path: &str) -> String {
    let path = normalize(path);
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn read(&self, path: &str) -> Result<Option<String>, MemoryError> {
        Ok(self.blobs.read().await.get(normalize(path)).cloned())
    }

    async fn write(&self, path: &str, contents: &str) -> Result<(), MemoryError> {
        self.blobs
            .write()
            .await
            .insert(normalize(path).to_string(), contents.to_string());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, MemoryError> {
        let prefix = dir_prefix(path);
        let blobs = self.blobs.read().await;
        let children: BTreeSet<String> = blobs
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    async fn delete(&self, path: &str) -> Result<bool, MemoryError> {
        let exact = normalize(path).to_string();
        let prefix = dir_prefix(path);
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|key, _| *key != exact && !key.starts_with(&prefix));
        Ok(blobs.len() < before)
    }
}
