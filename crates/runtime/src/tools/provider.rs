//! Tool provider boundary.

use async_trait::async_trait;
use serde_json::Value;

use super::ToolError;
use crate::model::ToolSpec;

/// An external source of callable tools.
///
/// Implementations own the transport (a child process, a socket, an
/// in-process fake). The connection manager drives the lifecycle:
/// `connect` once, `list_tools` once, any number of `invoke`s, then `close`.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Establish the link and complete any handshake.
    ///
    /// On error the provider must not leave anything running.
    async fn connect(&self) -> Result<(), ToolError>;

    /// Tools exposed by the provider, in the provider's own order.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// Invoke a tool by its provider-side name.
    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;

    /// Release the link. Calling it on a closed provider is a no-op.
    async fn close(&self) -> Result<(), ToolError>;
}
