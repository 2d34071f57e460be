//! Log types and pinned chunk tracking.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Which raw log a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    /// System and goal messages. Never pruned.
    Persistent,
    /// Working memory. Pruned by retrieval.
    Temporary,
}

impl LogType {
    pub const ALL: [LogType; 2] = [LogType::Persistent, LogType::Temporary];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Persistent => "persistent",
            LogType::Temporary => "temporary",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most recently produced chunk indices of one log, always kept through
/// recombination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedSet {
    recent: VecDeque<usize>,
}

impl PinnedSet {
    pub const CAPACITY: usize = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly produced chunk. The oldest pin falls out when full.
    pub fn record(&mut self, index: usize) {
        self.recent.retain(|&i| i != index);
        self.recent.push_front(index);
        self.recent.truncate(Self::CAPACITY);
    }

    /// Pinned indices, most recent first.
    pub fn indices(&self) -> Vec<usize> {
        self.recent.iter().copied().collect()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.recent.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
