//! Tool-provider client errors.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn provider: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("provider i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider not initialized")]
    NotInitialized,

    #[error("provider connection is closed")]
    Closed,

    #[error("provider exited unexpectedly")]
    ServerExited,

    #[error("timeout waiting for {method} response")]
    Timeout { method: String },

    #[error("failed to encode or decode message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },
}

impl Error {
    /// Whether retrying the same request on a fresh connection may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Spawn(_) | Error::Io(_) | Error::ServerExited | Error::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
