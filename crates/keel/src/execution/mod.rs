//! Tool Execution
//!
//! Single and batched tool dispatch with dependency chaining, bounded
//! concurrency, per-invocation timeouts and ordered results.

mod engine;
mod graph;
mod request;


pub use engine::ToolExecutionEngine;
pub use graph::{validate_requests, DependencyGraph};
pub use request::{ExecutionStatus, ToolExecutionRequest, ToolExecutionResult, PARENT_OUTPUT_KEY};
