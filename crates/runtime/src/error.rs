use std::time::Duration;

use thiserror::Error;

use crate::model::ModelError;
use crate::tools::ToolError;
use crate::transcript::Turn;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("provider `{provider}` failed to connect: {message}")]
    Connection { provider: String, message: String },

    #[error("provider connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("tool `{name}` from `{second}` collides with the one from `{first}`")]
    ToolNameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("model call failed: {0}")]
    Model(#[from] ModelError),

    /// A turn failed after some of its tool calls had already run. `turn`
    /// holds those calls.
    #[error("turn failed after {} tool calls: {source}", .turn.tool_calls.len())]
    TurnFailed { turn: Box<Turn>, source: Box<Error> },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
