//! The agent side of Memloop: bounded context assembly and the
//! function-call loop.
//!
//! A turn follows a **Compact → Complete → Act** cycle:
//!
//! 1. **Compact** both raw logs into a budget-respecting chat, indexing
//!    anything appended since the last request
//! 2. **Complete** against the function catalog
//! 3. **Act**: execute the requested function, store oversized results as
//!    variables, and log the outcome
//!
//! The loop continues until the termination predicate matches the called
//! function or the iteration limit is reached.

pub mod agent_context;
pub mod context;
pub mod functions;
pub mod loop_runner;
pub mod state;
pub mod variables;

#[cfg(test)]
mod test_helpers;

pub use agent_context::AgentContext;
pub use context::{CompactedChat, ContextManager, LogType, PinnedSet, TokenLimits};
pub use functions::{FINISH, FinishTool, ScriptTool};
pub use loop_runner::{FunctionLoop, LoopConfig, StepOutcome, TurnOutput};
pub use state::ContextState;
pub use variables::AgentVariables;
