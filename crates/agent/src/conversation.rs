use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convoy_core::config::AgentConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// Rolling history for one principal.
///
/// Up to `retention` turns are kept for display; only the newest `window` are replayed into the
/// model prompt. Owned by exactly one agent, so there is no interior locking.
#[derive(Clone, Debug)]
pub struct ConversationSession {
    turns: VecDeque<Turn>,
    window: usize,
    retention: usize,
}

impl ConversationSession {
    pub const DEFAULT_WINDOW: usize = 10;
    pub const DEFAULT_RETENTION: usize = 200;

    pub fn new(window: usize, retention: usize) -> Self {
        let window = window.max(1);
        Self { turns: VecDeque::new(), window, retention: retention.max(window) }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.history_window, config.history_retention)
    }

    pub fn push(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push_back(Turn { role, content: content.into(), recorded_at: Utc::now() });
        while self.turns.len() > self.retention {
            self.turns.pop_front();
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(TurnRole::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(TurnRole::Assistant, content);
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.push(TurnRole::System, content);
    }

    /// The turns replayed into the next model call, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(self.window))
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW, Self::DEFAULT_RETENTION)
    }
}
