//! Tool Base Trait
//!
//! The execution core only knows tools through this interface; concrete
//! tools live with whoever registers them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{ToolContext, ToolOptions};
use super::error::ToolError;

/// Name, description and schema as presented to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used for registration and lookup
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema the input is validated against before execution
    fn input_schema(&self) -> Value;

    /// Run the tool body.
    ///
    /// May be invoked more than once for the same request when a retryable
    /// error is returned, so it must tolerate repetition. Long-running bodies
    /// should watch `context.cancellation_token`.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError>;

    fn options(&self) -> ToolOptions {
        ToolOptions::default()
    }

    /// Circuit breaker key guarding this tool
    fn dependency(&self) -> String {
        self.options()
            .dependency
            .unwrap_or_else(|| self.name().to_string())
    }

    fn get_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
