//! # Memloop Core
//!
//! Domain types, capability traits, and error definitions for the Memloop
//! agent memory core. This crate has **no transport or storage code**: it
//! defines the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`]: the language-model completion transport
//! - [`EmbeddingProvider`]: the embedding transport
//! - [`Storage`]: hierarchical UTF-8 blob storage
//! - [`Tool`] / [`ScriptRunner`]: the function catalog and script boundary
//! - [`Tokenizer`]: token counting for budgets
//!
//! Implementations live in their respective crates, so the composition root
//! can wire real transports in production and deterministic fakes in tests.

pub mod cancel;
pub mod embedding;
pub mod error;
pub mod message;
pub mod provider;
pub mod script;
pub mod storage;
pub mod token;
pub mod tool;
pub mod variable;

// Re-export key types at crate root for ergonomics
pub use cancel::{CancelHandle, CancelSignal};
pub use embedding::EmbeddingProvider;
pub use error::{Error, Result};
pub use message::{FunctionCall, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use script::ScriptRunner;
pub use storage::Storage;
pub use token::{HeuristicTokenizer, Tokenizer};
pub use tool::{Tool, ToolContext, ToolRegistry, ToolResult};
pub use variable::Content;
