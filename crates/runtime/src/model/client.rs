//! Model client boundary.

use async_trait::async_trait;

use super::errors::ModelError;
use super::types::{Message, TokenUsage, ToolCall, ToolSpec};

/// One completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    /// Tools the model may request. Empty means no tool use.
    pub tools: &'a [ToolSpec],
    pub temperature: f32,
}

/// The model's reply plus what it cost.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub usage: TokenUsage,
}

impl Completion {
    pub fn content(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.message.tool_calls()
    }
}

/// Anything that can complete a conversation.
///
/// Implementations handle the provider specifics (HTTP, auth, wire format);
/// agents only see messages, tool specs and usage.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ModelError>;
}
