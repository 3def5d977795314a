//! Tool Error Types
//!
//! Tool bodies return `Result<T, ToolError>`. The engine converts these into
//! [`AgentError::Tool`], carrying the tool's own retryability verdict.

use std::time::Duration;
use thiserror::Error;

use crate::error_handling::AgentError;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// The filesystem guard or the tool itself refused the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Permanent failure of the tool logic
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Failure expected to clear up on a later attempt
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed(reason.into())
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::InvalidParams(reason.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Classify into the core taxonomy on behalf of `tool_name`
    pub fn into_agent_error(self, tool_name: &str) -> AgentError {
        let retryable = self.is_retryable();
        AgentError::tool(tool_name, self.to_string(), retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::AgentErrorKind;

    #[test]
    fn test_retryability() {
        assert!(ToolError::transient("busy").is_retryable());
        assert!(ToolError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ToolError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "x")).is_retryable());
        assert!(!ToolError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x")).is_retryable());
        assert!(!ToolError::execution_failed("bug").is_retryable());
        assert!(!ToolError::permission_denied("outside workspace").is_retryable());
        assert!(!ToolError::Cancelled.is_retryable());
    }

    #[test]
    fn test_into_agent_error() {
        let error = ToolError::transient("index locked").into_agent_error("grep");
        assert_eq!(error.kind(), AgentErrorKind::ToolExecution);
        assert!(error.is_retryable());
        assert_eq!(error.to_string(), "Tool 'grep' failed: Transient failure: index locked");

        let error = ToolError::permission_denied("/etc/shadow").into_agent_error("read_file");
        assert!(!error.is_retryable());
    }
}
