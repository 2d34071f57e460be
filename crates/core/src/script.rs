//! Script execution boundary.
//!
//! The sandboxed runtime that actually runs agent scripts lives outside this
//! workspace. The core only sees source text and named globals going in, and
//! a value or an error coming out.

use async_trait::async_trait;

use crate::cancel::CancelSignal;
use crate::error::ToolError;

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Runtime name (e.g., "deno", "quickjs").
    fn name(&self) -> &str;

    /// Run `source` with `globals` bound by name.
    ///
    /// `cancel` fires when the caller's wall-clock budget is spent. Runners
    /// are expected to check it at their own suspension points.
    async fn run(
        &self,
        source: &str,
        globals: serde_json::Map<String, serde_json::Value>,
        cancel: CancelSignal,
    ) -> Result<serde_json::Value, ToolError>;
}
