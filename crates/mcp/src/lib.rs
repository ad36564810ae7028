//! Stdio client for tool-provider processes.
//!
//! A provider is an external process that speaks JSON-RPC 2.0 over
//! stdin/stdout (the Model Context Protocol stdio transport). This crate
//! spawns it, performs the handshake, lists its tools, calls them, and shuts
//! the process down.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mcp::{Server, ServerConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::new("filesystem", "npx")
//!     .with_args(["-y", "@modelcontextprotocol/server-filesystem", "."]);
//!
//! let server = Server::spawn(config).await?;
//! server.initialize().await?;
//!
//! for tool in server.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = server
//!     .call_tool("read_file", serde_json::json!({ "path": "./README.md" }))
//!     .await?;
//! println!("{}", result.text());
//!
//! server.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod server;

pub use error::{Error, Result};
pub use protocol::{
    CallToolResult, InitializeResult, JsonRpcError, RequestId, ServerInfo, Tool, ToolContent,
};
pub use server::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, Server, ServerConfig};
