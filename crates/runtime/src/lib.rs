//! Society runtime: two-agent role-playing sessions over external tools.
//!
//! This crate connects to tool-provider processes, aggregates their tools
//! into one catalog, and drives a conversation between a user-proxy agent
//! and a tool-using assistant agent until the task is done.
//!
//! # Overview
//!
//! - **ToolConnectionManager**: connects every configured provider in
//!   parallel and hands out a [`ConnectionScope`] whose close is guaranteed.
//! - **ToolCatalog**: frozen, name-addressable snapshot of all provider tools,
//!   with an explicit [`CollisionPolicy`].
//! - **Agent**: one model-backed participant; the assistant runs a bounded
//!   tool loop per turn.
//! - **RolePlayingSession**: the `Initializing → Active → Terminated` state
//!   machine pairing the two agents around a [`Task`].
//! - **SessionRunner**: drives a session to its end and returns the answer,
//!   transcript and token usage.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runtime::{
//!     AnthropicAuth, AnthropicClient, ConnectionOptions, RolePlayingSession, SessionAborted,
//!     SessionConfig, SessionRunner, Task, ToolConnectionManager,
//! };
//!
//! # async fn example() -> Result<(), SessionAborted> {
//! let auth = AnthropicAuth::ApiKey("sk-ant-api01-...".into());
//! let model = Arc::new(AnthropicClient::builder(auth, "claude-sonnet-4-20250514").build());
//! let manager = ToolConnectionManager::from_configs(vec![], ConnectionOptions::default());
//! let mut runner = SessionRunner::new();
//!
//! let outcome = manager
//!     .scoped(|catalog| async move {
//!         let session = RolePlayingSession::new(
//!             Task::new("What is 2+2?"),
//!             model.clone(),
//!             model,
//!             catalog,
//!             SessionConfig::default(),
//!         );
//!         runner.run(session).await
//!     })
//!     .await?;
//! println!("{}", outcome.final_answer);
//! # Ok(())
//! # }
//! ```

mod agent;
mod error;
pub mod model;
pub mod prompts;
pub mod retry;
mod runner;
mod session;
pub mod testing;
pub mod tools;
mod transcript;

pub use agent::{Agent, ConversationState, DEFAULT_TOOL_CALL_BUDGET};
pub use error::{Error, Result};
pub use model::backend::{AnthropicAuth, AnthropicClient, AnthropicClientBuilder};
pub use model::{
    Completion, CompletionRequest, Message, ModelClient, ModelError, Part, Role, TokenUsage,
    ToolCall, ToolOutcome, ToolResult, ToolSpec,
};
pub use prompts::RoleNames;
pub use retry::RetryPolicy;
pub use runner::{SessionAborted, SessionOutcome, SessionRunner};
pub use session::{
    RolePlayingSession, SessionConfig, SessionState, Task, TerminationMarkers, TerminationStatus,
};
pub use tools::{
    CollisionPolicy, ConnectionHandle, ConnectionOptions, ConnectionScope, ConnectionState,
    FailurePolicy, McpProvider, ProviderConfig, ProviderEntry, ProviderFailure, ToolCatalog,
    ToolConnectionManager, ToolDescriptor, ToolError, ToolProvider,
};
pub use transcript::{Degradation, ToolInvocation, Transcript, Turn};
