//! Turns and the append-only transcript of a session.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Role, TokenUsage, ToolOutcome};

/// One tool call made during a turn, with its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: ToolOutcome,
}

/// Why a turn ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// The model asked for more tool calls than the per-turn budget allows.
    ToolCallBudgetExceeded { budget: usize },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::ToolCallBudgetExceeded { budget } => {
                write!(f, "tool call budget of {budget} exceeded")
            }
        }
    }
}

/// One agent's complete output within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Tool calls in the order they were issued.
    pub tool_calls: Vec<ToolInvocation>,
    /// Whether the content carries a termination marker.
    pub terminal: bool,
    pub degraded: Option<Degradation>,
    /// Tokens spent producing this turn.
    pub usage: TokenUsage,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            terminal: false,
            degraded: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Ordered record of every turn in a session. Turns can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == Role::Assistant)
    }

    /// Sum of the usage recorded on every turn.
    pub fn usage(&self) -> TokenUsage {
        self.turns.iter().map(|turn| turn.usage).sum()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
