//! Built-in catalog functions.

use std::sync::Arc;

use async_trait::async_trait;
use memloop_core::error::ToolError;
use memloop_core::script::ScriptRunner;
use memloop_core::tool::{Tool, ToolContext, ToolResult};
use serde_json::Value;
use tracing::debug;

/// Name of the built-in termination function.
pub const FINISH: &str = "finish";

/// Ends the task with a final answer.
pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        FINISH
    }

    fn description(&self) -> &str {
        "Finish the task and report the final answer."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "The final answer for the user"
                }
            },
            "required": ["answer"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        match arguments.get("answer") {
            Some(Value::String(answer)) => Ok(ToolResult::ok(answer.clone())),
            Some(other) => Ok(ToolResult::ok(other.clone())),
            None => Err(ToolError::InvalidArguments(
                "missing required argument 'answer'".into(),
            )),
        }
    }
}

/// Exposes a [`ScriptRunner`] as a catalog function.
pub struct ScriptTool {
    runner: Arc<dyn ScriptRunner>,
}

impl ScriptTool {
    pub const NAME: &'static str = "run_script";

    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run a script in the sandbox. Named globals are bound before it starts; \
         pass a variable placeholder as a global to hand it a stored value."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "description": "Script source text"
                },
                "globals": {
                    "type": "object",
                    "description": "Values bound as globals, by name"
                }
            },
            "required": ["source"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let source = arguments
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing required argument 'source'".into()))?;
        let globals = match arguments.get("globals") {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ToolError::InvalidArguments(
                    "'globals' must be an object".into(),
                ));
            }
        };

        debug!(runner = self.runner.name(), globals = globals.len(), "Running script");
        let value = self.runner.run(source, globals, ctx.cancel.clone()).await?;
        Ok(ToolResult::ok(value))
    }
}
