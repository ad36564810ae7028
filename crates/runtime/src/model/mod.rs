//! Model protocol types, the client trait, and provider backends.

pub mod backend;
mod client;
pub mod errors;
pub mod types;

pub use client::{Completion, CompletionRequest, ModelClient};
pub use errors::ModelError;
pub use types::{
    Message, Part, Role, TokenUsage, ToolCall, ToolOutcome, ToolResult, ToolSpec,
};
