//! Saved state of an agent context.
//!
//! Collections persist themselves document by document; the raw logs and the
//! variables live in one snapshot next to them at `<context>/state.json`.

use memloop_core::error::{MemoryError, Result};
use memloop_core::message::Message;
use memloop_core::storage::{self, Storage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::variables::AgentVariables;

pub const STATE_FILE: &str = "state.json";

/// Bumped whenever the snapshot layout changes incompatibly.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextState {
    pub version: u32,
    #[serde(default)]
    pub persistent: Vec<Message>,
    #[serde(default)]
    pub temporary: Vec<Message>,
    #[serde(default)]
    pub variables: AgentVariables,
}

impl ContextState {
    pub fn new(
        persistent: Vec<Message>,
        temporary: Vec<Message>,
        variables: AgentVariables,
    ) -> Self {
        Self {
            version: STATE_VERSION,
            persistent,
            temporary,
            variables,
        }
    }

    pub fn path(context_id: &str) -> String {
        storage::join(context_id, STATE_FILE)
    }

    /// Load the snapshot of `context_id`, if one was saved.
    pub async fn load(storage: &dyn Storage, context_id: &str) -> Result<Option<Self>> {
        let path = Self::path(context_id);
        let Some(raw) = storage.read(&path).await? else {
            return Ok(None);
        };
        let state: Self = serde_json::from_str(&raw).map_err(|e| MemoryError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if state.version != STATE_VERSION {
            return Err(MemoryError::Corrupt {
                path,
                reason: format!(
                    "snapshot version {} is not supported (expected {STATE_VERSION})",
                    state.version
                ),
            }
            .into());
        }
        Ok(Some(state))
    }

    pub async fn save(&self, storage: &dyn Storage, context_id: &str) -> Result<()> {
        let raw = serde_json::to_string(self)?;
        storage.write(&Self::path(context_id), &raw).await?;
        debug!(
            context = context_id,
            persistent = self.persistent.len(),
            temporary = self.temporary.len(),
            variables = self.variables.len(),
            "State saved"
        );
        Ok(())
    }
}
