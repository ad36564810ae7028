//! Tool provider backed by a stdio JSON-RPC process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp::{Server, ServerConfig};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ToolError, ToolProvider};
use crate::model::ToolSpec;

/// How long a provider gets to exit after its stdin closes.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A provider process, spawned on `connect` and shut down on `close`.
pub struct McpProvider {
    config: ServerConfig,
    request_timeout: Duration,
    shutdown_grace: Duration,
    server: Mutex<Option<Arc<Server>>>,
}

impl McpProvider {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            request_timeout: mcp::DEFAULT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            server: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    async fn server(&self) -> Result<Arc<Server>, ToolError> {
        self.server
            .lock()
            .await
            .clone()
            .ok_or_else(|| ToolError::Closed(self.config.name.clone()))
    }
}

#[async_trait]
impl ToolProvider for McpProvider {
    async fn connect(&self) -> Result<(), ToolError> {
        let mut slot = self.server.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let server = Server::spawn(self.config.clone())
            .await?
            .with_request_timeout(self.request_timeout);

        if let Err(e) = server.initialize().await {
            if let Err(shutdown) = server.shutdown(self.shutdown_grace).await {
                debug!(provider = %self.config.name, error = %shutdown, "cleanup after failed handshake");
            }
            return Err(e.into());
        }

        *slot = Some(Arc::new(server));
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let tools = self.server().await?.list_tools().await?;
        Ok(tools
            .into_iter()
            .map(|tool| {
                ToolSpec::new(
                    tool.name,
                    tool.description.unwrap_or_default(),
                    tool.input_schema,
                )
            })
            .collect())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        if !(arguments.is_object() || arguments.is_null()) {
            return Err(ToolError::InvalidInput(format!(
                "arguments for `{name}` must be a JSON object"
            )));
        }

        let result = self.server().await?.call_tool(name, arguments).await?;
        if result.is_error {
            return Err(ToolError::Execution(result.text()));
        }
        Ok(result.into_value())
    }

    async fn close(&self) -> Result<(), ToolError> {
        let Some(server) = self.server.lock().await.take() else {
            return Ok(());
        };
        server.shutdown(self.shutdown_grace).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_missing_binary_fails() {
        let provider = McpProvider::new(ServerConfig::new("ghost", "/nonexistent/provider-bin"));
        let err = provider.connect().await.unwrap_err();
        assert!(matches!(err, ToolError::Connection(_)));
    }

    #[tokio::test]
    async fn calls_before_connect_report_closed() {
        let provider = McpProvider::new(ServerConfig::new("idle", "cat"));
        let err = provider.list_tools().await.unwrap_err();
        assert_eq!(err, ToolError::Closed("idle".into()));
        provider.close().await.unwrap();
    }

    #[tokio::test]
    async fn non_object_arguments_are_rejected() {
        let provider = McpProvider::new(ServerConfig::new("idle", "cat"));
        let err = provider
            .invoke("anything", Value::from(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
