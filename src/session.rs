//! Conversation history for one chat session.
//!
//! A [`Session`] is owned by whoever drives the conversation (the CLI loop or
//! the MCP server) and passed into the pipeline explicitly. Turns are only
//! ever appended, and only after a full exchange has succeeded.

use crate::llm::{Message, Role};

/// One role-tagged entry in session history.
pub type Turn = Message;

/// Ordered, append-only turn history.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<Turn>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn::new(role, content));
    }

    /// Append a completed user/assistant exchange.
    pub fn record_exchange(&mut self, utterance: &str, reply: impl Into<String>) {
        self.append_turn(Role::User, utterance);
        self.append_turn(Role::Assistant, reply);
    }

    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    /// Owned copy of the history for a turn running without holding the session.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Drop all turns. Returns how many were removed.
    pub fn reset(&mut self) -> usize {
        let dropped = self.turns.len();
        self.turns.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
