use thiserror::Error;

/// Errors that can occur while talking to a tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection `{0}` is not ready")]
    Closed(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Connection(_) | ToolError::Timeout(_))
    }
}

impl From<mcp::Error> for ToolError {
    fn from(err: mcp::Error) -> Self {
        match err {
            err @ mcp::Error::Timeout { .. } => ToolError::Timeout(err.to_string()),
            err if err.is_transient() => ToolError::Connection(err.to_string()),
            mcp::Error::Closed => ToolError::Connection(err.to_string()),
            err => ToolError::Execution(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_tool_errors() {
        assert!(matches!(
            ToolError::from(mcp::Error::ServerExited),
            ToolError::Connection(_)
        ));
        assert!(matches!(
            ToolError::from(mcp::Error::InvalidResponse("bad".into())),
            ToolError::Execution(_)
        ));
        assert!(ToolError::Connection("refused".into()).is_retryable());
        assert!(!ToolError::UnknownTool("nope".into()).is_retryable());
    }
}
