//! Tool trait: the function catalog the agent can call.
//!
//! Tools are what give the agent the ability to act in the world. Their
//! results may be far larger than the context budget; the function-call loop
//! decides whether to log a result inline or externalize it as a variable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cancel::CancelSignal;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::variable;

/// The result of a tool execution.
///
/// A tool may produce more than one result message; each output becomes its
/// own function-result message in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// `false` when the tool ran but rejected the request on semantic grounds.
    pub success: bool,

    /// One value per produced result message
    pub outputs: Vec<serde_json::Value>,
}

impl ToolResult {
    /// A successful single-output result.
    pub fn ok(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            outputs: vec![output.into()],
        }
    }

    /// A successful result with several outputs.
    pub fn many(outputs: Vec<serde_json::Value>) -> Self {
        Self {
            success: true,
            outputs,
        }
    }

    /// The tool ran but refused the request.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: vec![serde_json::Value::String(reason.into())],
        }
    }
}

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The function name as resolved from the catalog
    pub function: String,

    /// Fires when the wall-clock budget for this call runs out
    pub cancel: CancelSignal,
}

impl ToolContext {
    pub fn new(function: impl Into<String>, cancel: CancelSignal) -> Self {
        Self {
            function: function.into(),
            cancel,
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "fetch_page").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-parsed, variable-substituted arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed and iterated by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    ///
    /// Tool names seed variable names (`<name>_<count>`), so they must be
    /// valid placeholder names.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if !variable::is_valid_name(&name) {
            return Err(ToolError::InvalidArguments(format!(
                "'{name}' is not a valid function name"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Box<dyn Tool>) -> std::result::Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM), ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(arguments["text"].clone()))
        }
    }

    struct BadName;

    #[async_trait]
    impl Tool for BadName {
        fn name(&self) -> &str {
            "two words"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(""))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_rejects_names_unusable_as_variable_prefix() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Box::new(BadName)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_definitions() {
        let registry = ToolRegistry::new().with(Box::new(EchoTool)).unwrap();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn execute_echo_tool() {
        let registry = ToolRegistry::new().with(Box::new(EchoTool)).unwrap();
        let ctx = ToolContext::new("echo", CancelSignal::never());
        let result = registry
            .get("echo")
            .unwrap()
            .execute(serde_json::json!({"text": "hello world"}), &ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.outputs, vec![serde_json::json!("hello world")]);
    }

    #[test]
    fn rejected_result_is_not_successful() {
        let result = ToolResult::rejected("no such file");
        assert!(!result.success);
        assert_eq!(result.outputs.len(), 1);
    }
}
