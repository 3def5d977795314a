//! Tool System
//!
//! The interface tools implement, the registry that validates their input,
//! and the context handed to a running tool body.

pub mod base;
pub mod context;
pub mod error;
pub mod registry;

pub use base::{Tool, ToolDefinition};
pub use context::{AllowedRoots, PathGuard, ToolContext, ToolOptions};
pub use error::ToolError;
pub use registry::ToolRegistry;
