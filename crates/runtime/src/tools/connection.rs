//! One live link to a tool provider.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ToolError, ToolProvider};
use crate::model::ToolSpec;
use crate::retry::RetryPolicy;

/// Lifecycle of a provider connection.
///
/// `Connecting → Ready → Closing → Closed`, with `Failed` reachable from any
/// non-terminal state. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A provider plus its connection state and the tools it contributed.
pub struct ConnectionHandle {
    label: String,
    provider: Arc<dyn ToolProvider>,
    state: Mutex<ConnectionState>,
    tools: OnceLock<Vec<ToolSpec>>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("label", &self.label)
            .field("state", &self.state())
            .field("tools", &self.tools().len())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new(label: impl Into<String>, provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            label: label.into(),
            provider,
            state: Mutex::new(ConnectionState::Connecting),
            tools: OnceLock::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Tools listed at connect time. Empty until the handle is ready.
    pub fn tools(&self) -> &[ToolSpec] {
        self.tools.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Connect (retrying transient failures) and list tools.
    ///
    /// On failure the handle ends up `Failed` with nothing left open.
    pub async fn open(&self, retry: &RetryPolicy) -> Result<(), ToolError> {
        debug!(provider = %self.label, "connecting");

        if let Err(e) = retry.execute(|| self.provider.connect()).await {
            self.set_state(ConnectionState::Failed);
            return Err(e);
        }

        match self.provider.list_tools().await {
            Ok(tools) => {
                debug!(provider = %self.label, tools = tools.len(), "provider ready");
                let _ = self.tools.set(tools);
                self.set_state(ConnectionState::Ready);
                Ok(())
            }
            Err(e) => {
                if let Err(close) = self.provider.close().await {
                    warn!(provider = %self.label, error = %close, "close after failed listing");
                }
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Invoke a tool by its provider-side name. Requires `Ready`.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        if self.state() != ConnectionState::Ready {
            return Err(ToolError::Closed(self.label.clone()));
        }
        self.provider.invoke(name, arguments).await
    }

    /// Close the provider, waiting at most `timeout`.
    ///
    /// Returns the resulting state. A handle that is already closing or in a
    /// terminal state is left untouched.
    pub async fn close(&self, timeout: Duration) -> ConnectionState {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                ConnectionState::Connecting | ConnectionState::Ready => {
                    *state = ConnectionState::Closing;
                }
                current => return current,
            }
        }

        let next = match tokio::time::timeout(timeout, self.provider.close()).await {
            Ok(Ok(())) => {
                debug!(provider = %self.label, "closed");
                ConnectionState::Closed
            }
            Ok(Err(e)) => {
                warn!(provider = %self.label, error = %e, "close failed");
                ConnectionState::Failed
            }
            Err(_) => {
                warn!(provider = %self.label, ?timeout, "close timed out");
                ConnectionState::Failed
            }
        };
        self.set_state(next);
        next
    }
}
