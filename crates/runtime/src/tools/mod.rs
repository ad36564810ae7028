//! Tool providers, their connections, and the aggregated catalog.

mod catalog;
mod connection;
pub mod errors;
mod manager;
mod mcp_host;
mod provider;

pub use catalog::{CatalogBuilder, CollisionPolicy, NAMESPACE_SEPARATOR, ToolCatalog, ToolDescriptor};
pub use connection::{ConnectionHandle, ConnectionState};
pub use errors::ToolError;
pub use manager::{
    ConnectionOptions, ConnectionScope, FailurePolicy, ProviderConfig, ProviderEntry,
    ProviderFailure, ToolConnectionManager,
};
pub use mcp_host::{DEFAULT_SHUTDOWN_GRACE, McpProvider};
pub use provider::ToolProvider;
