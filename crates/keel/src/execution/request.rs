//! Execution requests and results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error_handling::AgentError;

/// Key under which a parent's output is handed to a chained request
pub const PARENT_OUTPUT_KEY: &str = "parent_output";

/// One tool invocation requested by the conversation loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRequest {
    pub execution_id: String,
    pub tool_name: String,
    pub input: Value,
    /// Request in the same batch whose output this one consumes
    pub parent_execution_id: Option<String>,
}

impl ToolExecutionRequest {
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
            parent_execution_id: None,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    /// Defer this request until `parent` has succeeded and receive its output
    pub fn depends_on(mut self, parent: impl Into<String>) -> Self {
        self.parent_execution_id = Some(parent.into());
        self
    }

    /// Input with the parent's output copied in.
    ///
    /// Object inputs gain a `parent_output` field; anything else is wrapped
    /// as `{"input": ..., "parent_output": ...}`.
    pub(crate) fn input_with_parent_output(&self, parent_output: Option<&Value>) -> Value {
        let Some(parent_output) = parent_output else {
            return self.input.clone();
        };
        match &self.input {
            Value::Object(map) => {
                let mut map = map.clone();
                map.insert(PARENT_OUTPUT_KEY.to_string(), parent_output.clone());
                Value::Object(map)
            }
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".to_string(), other.clone());
                map.insert(PARENT_OUTPUT_KEY.to_string(), parent_output.clone());
                Value::Object(map)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    TimedOut,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Immutable outcome of one request
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub execution_id: String,
    pub parent_execution_id: Option<String>,
    pub tool_name: String,
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    /// Sanitized error for `Failed` and `TimedOut`
    pub error: Option<AgentError>,
    pub duration: Duration,
    pub retry_count: u32,
}

impl ToolExecutionResult {
    pub(crate) fn success(
        request: &ToolExecutionRequest,
        output: Value,
        duration: Duration,
        retry_count: u32,
    ) -> Self {
        Self {
            execution_id: request.execution_id.clone(),
            parent_execution_id: request.parent_execution_id.clone(),
            tool_name: request.tool_name.clone(),
            status: ExecutionStatus::Success,
            output: Some(output),
            error: None,
            duration,
            retry_count,
        }
    }

    /// Failed or timed out, depending on the error kind
    pub(crate) fn failure(
        request: &ToolExecutionRequest,
        error: AgentError,
        duration: Duration,
        retry_count: u32,
    ) -> Self {
        let status = match error {
            AgentError::Timeout { .. } => ExecutionStatus::TimedOut,
            _ => ExecutionStatus::Failed,
        };
        Self {
            execution_id: request.execution_id.clone(),
            parent_execution_id: request.parent_execution_id.clone(),
            tool_name: request.tool_name.clone(),
            status,
            output: None,
            error: Some(error),
            duration,
            retry_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_request_has_unique_id() {
        let a = ToolExecutionRequest::new("bash", json!({}));
        let b = ToolExecutionRequest::new("bash", json!({}));
        assert_ne!(a.execution_id, b.execution_id);
        assert!(a.parent_execution_id.is_none());
    }

    #[test]
    fn test_parent_output_merged_into_object() {
        let request = ToolExecutionRequest::new("format", json!({"style": "short"})).depends_on("a");
        let input = request.input_with_parent_output(Some(&json!("42")));
        assert_eq!(input, json!({"style": "short", "parent_output": "42"}));
        // the request itself is untouched
        assert_eq!(request.input, json!({"style": "short"}));
    }

    #[test]
    fn test_parent_output_wraps_non_object() {
        let request = ToolExecutionRequest::new("format", json!("raw"));
        let input = request.input_with_parent_output(Some(&json!([1, 2])));
        assert_eq!(input, json!({"input": "raw", "parent_output": [1, 2]}));
        assert_eq!(request.input_with_parent_output(None), json!("raw"));
    }

    #[test]
    fn test_failure_status_follows_error_kind() {
        let request = ToolExecutionRequest::new("slow", json!({}));
        let timed_out = ToolExecutionResult::failure(
            &request,
            AgentError::timeout(Duration::from_secs(1)),
            Duration::from_secs(1),
            0,
        );
        assert_eq!(timed_out.status, ExecutionStatus::TimedOut);

        let failed = ToolExecutionResult::failure(
            &request,
            AgentError::tool("slow", "boom", false),
            Duration::ZERO,
            2,
        );
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.retry_count, 2);
        assert!(!failed.is_success());
    }
}
