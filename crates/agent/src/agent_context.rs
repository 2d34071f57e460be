//! Per-agent-context state.
//!
//! An [`AgentContext`] is the composition root for one task: it wires a
//! [`ContextManager`] and an [`AgentVariables`] store against the storage,
//! embedding and tokenizer capabilities it is given. There is no global
//! state; sub-tasks get their own context through [`AgentContext::fork`].

use std::sync::Arc;

use memloop_core::embedding::EmbeddingProvider;
use memloop_core::error::{Error, Result};
use memloop_core::message::Message;
use memloop_core::storage::Storage;
use memloop_core::token::Tokenizer;
use memloop_core::variable::{self, Content};
use memloop_memory::ChunkerConfig;
use tracing::info;

use crate::context::{CompactedChat, ContextManager, LogType, TokenLimits};
use crate::state::ContextState;
use crate::variables::{AgentVariables, render};

/// Upper bound on the text embedded as the retrieval query.
const CONTEXT_TEXT_CHARS: usize = 4000;

/// Whether `id` can name a context directory.
pub fn is_valid_context_id(id: &str) -> bool {
    variable::is_valid_name(id) && !id.starts_with('.')
}

pub struct AgentContext {
    id: String,
    storage: Arc<dyn Storage>,
    tokenizer: Arc<dyn Tokenizer>,
    manager: ContextManager,
    variables: AgentVariables,
}

impl AgentContext {
    /// Open context `id`, resuming from its saved state if there is one.
    pub async fn open(
        id: impl Into<String>,
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        chunker: ChunkerConfig,
    ) -> Result<Self> {
        let id = id.into();
        if !is_valid_context_id(&id) {
            return Err(Error::Config {
                message: format!("'{id}' is not a valid context id"),
            });
        }

        let manager = ContextManager::open(
            id.clone(),
            Arc::clone(&storage),
            embedder,
            Arc::clone(&tokenizer),
            chunker,
        )
        .await?;

        let mut ctx = Self {
            id,
            storage,
            tokenizer,
            manager,
            variables: AgentVariables::new(),
        };
        if ctx.load_state().await? {
            info!(
                context = %ctx.id,
                persistent = ctx.manager.messages(LogType::Persistent).len(),
                temporary = ctx.manager.messages(LogType::Temporary).len(),
                "Context resumed"
            );
        }
        Ok(ctx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn manager(&self) -> &ContextManager {
        &self.manager
    }

    pub fn variables(&self) -> &AgentVariables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut AgentVariables {
        &mut self.variables
    }

    pub fn append(&mut self, log: LogType, message: Message) {
        self.manager.append(log, message);
    }

    /// State the task. Goals are never pruned.
    pub fn push_goal(&mut self, goal: impl Into<String>) {
        self.append(LogType::Persistent, Message::system(goal));
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.append(LogType::Temporary, Message::user(text));
    }

    /// Text describing where the conversation currently is: the last
    /// `recent` working messages, or the goals before any exist.
    pub fn context_text(&self, recent: usize) -> String {
        let temporary = self.manager.messages(LogType::Temporary);
        let source = if temporary.is_empty() {
            self.manager.messages(LogType::Persistent)
        } else {
            &temporary[temporary.len().saturating_sub(recent)..]
        };

        let text = source
            .iter()
            .map(|m| self.describe(m))
            .collect::<Vec<_>>()
            .join("\n");
        tail_chars(&text, CONTEXT_TEXT_CHARS).to_string()
    }

    fn describe(&self, message: &Message) -> String {
        let mut text = match message.content_ref() {
            Content::Variable(name) => match self.variables.get(name) {
                Some(value) => render(value),
                None => message.content.clone(),
            },
            Content::Literal(text) => text.to_string(),
        };
        if let Some(call) = &message.function_call {
            text.push_str(&format!("\n{}({})", call.name, call.arguments));
        }
        text
    }

    /// Build a compacted chat for the given limits.
    pub async fn compact(&mut self, limits: &TokenLimits, recent: usize) -> Result<CompactedChat> {
        let context = self.context_text(recent);
        self.manager
            .contextualize(&context, limits, &self.variables)
            .await
    }

    /// Index anything appended since the last compaction.
    pub async fn catch_up(&mut self) -> Result<usize> {
        self.manager.catch_up(&self.variables).await
    }

    pub async fn save_state(&self) -> Result<()> {
        ContextState::new(
            self.manager.messages(LogType::Persistent).to_vec(),
            self.manager.messages(LogType::Temporary).to_vec(),
            self.variables.clone(),
        )
        .save(self.storage.as_ref(), &self.id)
        .await
    }

    /// Reload logs and variables from the saved snapshot. Returns whether
    /// one existed.
    pub async fn load_state(&mut self) -> Result<bool> {
        let Some(state) = ContextState::load(self.storage.as_ref(), &self.id).await? else {
            return Ok(false);
        };
        self.manager.restore(LogType::Persistent, state.persistent);
        self.manager.restore(LogType::Temporary, state.temporary);
        self.variables = state.variables;
        Ok(true)
    }

    /// Clone chat state and variables into a new context for a delegated
    /// sub-task. Both share the storage handle.
    pub async fn fork(&self, id: impl Into<String>) -> Result<AgentContext> {
        let id = id.into();
        if !is_valid_context_id(&id) || id == self.id {
            return Err(Error::Config {
                message: format!("cannot fork '{}' into '{id}'", self.id),
            });
        }
        let forked = AgentContext {
            manager: self.manager.fork(id.clone()).await?,
            id,
            storage: Arc::clone(&self.storage),
            tokenizer: Arc::clone(&self.tokenizer),
            variables: self.variables.clone(),
        };
        forked.save_state().await?;
        Ok(forked)
    }

    /// Delete everything stored for context `id`.
    pub async fn forget(storage: &dyn Storage, id: &str) -> Result<bool> {
        if !is_valid_context_id(id) {
            return Err(Error::Config {
                message: format!("'{id}' is not a valid context id"),
            });
        }
        let removed = storage.delete(id).await?;
        info!(context = id, removed, "Context forgotten");
        Ok(removed)
    }
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}
