//! Bounded context assembly.
//!
//! | Log | Contents | Pruning |
//! |-----|----------|---------|
//! | Persistent | System and goal messages | Never, within its budget |
//! | Temporary | Working memory | Retrieval against the current context |
//!
//! Both logs are chunked and embedded lazily; a compacted chat is rebuilt
//! from each log's collection on every request.

pub mod budget;
pub mod log;
pub mod manager;

pub use budget::TokenLimits;
pub use log::{LogType, PinnedSet};
pub use manager::{CompactedChat, ContextManager};
