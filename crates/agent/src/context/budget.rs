//! Per-log token limits.

use super::log::LogType;

/// How many tokens each log may contribute to a compacted chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLimits {
    pub persistent: usize,
    pub temporary: usize,
}

impl TokenLimits {
    pub fn new(persistent: usize, temporary: usize) -> Self {
        Self {
            persistent,
            temporary,
        }
    }

    /// Split what is left of `window` after the response reservation and the
    /// function catalog. `persistent_share` goes to the persistent log, the
    /// rest to working memory.
    pub fn fit(
        window: usize,
        reserved_for_response: usize,
        catalog_tokens: usize,
        persistent_share: f32,
    ) -> Self {
        let available = window.saturating_sub(reserved_for_response.saturating_add(catalog_tokens));
        let share = persistent_share.clamp(0.0, 1.0) as f64;
        let persistent = ((available as f64) * share).floor() as usize;
        Self {
            persistent,
            temporary: available - persistent,
        }
    }

    pub fn get(&self, log: LogType) -> usize {
        match log {
            LogType::Persistent => self.persistent,
            LogType::Temporary => self.temporary,
        }
    }

    pub fn total(&self) -> usize {
        self.persistent + self.temporary
    }
}
