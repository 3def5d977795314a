//! Tool Registry
//!
//! Holds registered tools with their input schemas compiled at registration
//! time.

use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::base::{Tool, ToolDefinition};
use crate::error_handling::AgentError;

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: Validator,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name.
    ///
    /// Fails with a configuration error if the input schema does not compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        let schema = tool.input_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            AgentError::config(format!("invalid input schema for tool '{}': {}", name, e))
        })?;
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name).map(|r| r.tool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    /// Tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|r| r.tool.get_definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `input` against the tool's declared schema.
    ///
    /// All violations are reported in one message; `field` is the JSON
    /// pointer of the first one.
    pub fn validate(&self, name: &str, input: &Value) -> Result<(), AgentError> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::validation("tool_name", format!("unknown tool '{}'", name)))?;

        let mut field = None;
        let mut messages = Vec::new();
        for error in registered.validator.iter_errors(input) {
            if field.is_none() {
                field = Some(error.instance_path.to_string());
            }
            messages.push(error.to_string());
        }

        if messages.is_empty() {
            return Ok(());
        }
        let field = match field {
            Some(path) if !path.is_empty() => path,
            _ => "input".to_string(),
        };
        Err(AgentError::validation(field, messages.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolContext, ToolError};
    use async_trait::async_trait;
    use serde_json::json;

    struct ReadFileTool;

    #[async_trait]
    impl Tool for ReadFileTool {
        fn name(&self) -> &str {
            "read_file"
        }

        fn description(&self) -> &str {
            "Read a file"
        }

        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["path"]
            })
        }

        async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!("contents"))
        }
    }

    struct BrokenSchemaTool;

    #[async_trait]
    impl Tool for BrokenSchemaTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Declares an invalid schema"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": 12 })
        }

        async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool)).unwrap();
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        assert!(registry.contains("read_file"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("read_file").is_some());
        assert!(registry.get("write_file").is_none());
        assert_eq!(registry.get_definitions()[0].name, "read_file");
    }

    #[test]
    fn test_validate_accepts_valid_input() {
        let registry = registry();
        assert!(registry.validate("read_file", &json!({"path": "a.txt"})).is_ok());
    }

    #[test]
    fn test_validate_reports_missing_field() {
        let registry = registry();
        let err = registry.validate("read_file", &json!({})).unwrap_err();
        match err {
            AgentError::Validation { field, message, .. } => {
                assert_eq!(field, "input");
                assert!(message.contains("path"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_reports_field_pointer() {
        let registry = registry();
        let err = registry
            .validate("read_file", &json!({"path": "a", "limit": 0}))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation { ref field, .. } if field == "/limit"));
    }

    #[test]
    fn test_validate_unknown_tool() {
        let err = registry().validate("nope", &json!({})).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut registry = ToolRegistry::new();
        let err = registry.register(Arc::new(BrokenSchemaTool)).unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
        assert!(registry.is_empty());
    }
}
