//! Message domain types.
//!
//! These are the value objects that flow through the whole core:
//! raw log → chunker → vector store → recombiner → compacted chat → provider.

use serde::{Deserialize, Serialize};

use crate::variable::Content;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions, goals, and loop nudges
    System,
    /// Function execution result
    Function,
}

/// A function invocation requested by the assistant.
///
/// `arguments` is the raw argument text exactly as the model produced it;
/// parsing happens in the function-call loop so that unparsable arguments
/// can be reported back in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to invoke
    pub name: String,

    /// Arguments as raw JSON text
    pub arguments: String,
}

/// A single message in a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content, or a `${name}` placeholder for an externalized value
    pub content: String,

    /// For function results, the function that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Function call requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Optional metadata (chunk provenance, variable names, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            function_call: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create an assistant message that requests a function call.
    pub fn function_call(
        thought: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        let mut message = Self::with_role(Role::Assistant, thought);
        message.function_call = Some(FunctionCall {
            name: name.into(),
            arguments: arguments.into(),
        });
        message
    }

    /// Create a function result message.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(Role::Function, content);
        message.name = Some(name.into());
        message
    }

    /// Whether this message is a function call or a function result.
    pub fn is_function_message(&self) -> bool {
        self.function_call.is_some() || self.role == Role::Function
    }

    /// Read the content as a tagged value: literal text or a variable reference.
    pub fn content_ref(&self) -> Content<'_> {
        Content::parse(&self.content)
    }

    /// Look up a string metadata field.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Serialized wire form used for token counting and chunk payloads.
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings and maps cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
