//! Tool Context and Options
//!
//! - `ToolContext`: what a tool body sees while it runs
//! - `ToolOptions`: per-tool execution settings
//! - `PathGuard`: filesystem allow-list consulted before I/O

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::ToolError;

/// Filesystem guard consulted by tools before touching a path
pub trait PathGuard: Send + Sync + std::fmt::Debug {
    fn check_path(&self, path: &Path) -> Result<(), ToolError>;
}

/// Allows paths under a fixed set of root directories
#[derive(Debug, Clone, Default)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }
}

impl PathGuard for AllowedRoots {
    fn check_path(&self, path: &Path) -> Result<(), ToolError> {
        // reject traversal rather than resolving it
        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if !escapes && self.roots.iter().any(|root| path.starts_with(root)) {
            return Ok(());
        }
        Err(ToolError::permission_denied(format!(
            "{} is outside the allowed directories",
            path.display()
        )))
    }
}

/// Tool execution context
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_directory: PathBuf,
    /// Execution this context belongs to
    pub execution_id: String,
    pub parent_execution_id: Option<String>,
    /// Cancelled by the engine when the invocation's deadline passes
    pub cancellation_token: CancellationToken,
    pub path_guard: Option<Arc<dyn PathGuard>>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_directory: std::env::current_dir().unwrap_or_default(),
            execution_id: String::new(),
            parent_execution_id: None,
            cancellation_token: CancellationToken::new(),
            path_guard: None,
        }
    }
}

impl ToolContext {
    pub fn new(working_directory: PathBuf) -> Self {
        Self {
            working_directory,
            ..Default::default()
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn with_parent_execution_id(mut self, parent: Option<String>) -> Self {
        self.parent_execution_id = parent;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_path_guard(mut self, guard: Arc<dyn PathGuard>) -> Self {
        self.path_guard = Some(guard);
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Ask the filesystem guard about `path`; relative paths resolve
    /// against the working directory. Without a guard every path passes.
    pub fn check_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_directory.join(path)
        };
        if let Some(guard) = &self.path_guard {
            guard.check_path(&resolved)?;
        }
        Ok(resolved)
    }
}

/// Per-tool execution settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOptions {
    /// Overrides the engine's default timeout
    #[serde(default, with = "crate::config::duration_ms::option")]
    pub timeout: Option<Duration>,
    /// Circuit breaker key; defaults to the tool name
    #[serde(default)]
    pub dependency: Option<String>,
}

impl ToolOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_path_without_guard() {
        let ctx = ToolContext::new(PathBuf::from("/work"));
        assert_eq!(
            ctx.check_path(Path::new("src/lib.rs")).unwrap(),
            PathBuf::from("/work/src/lib.rs")
        );
    }

    #[test]
    fn test_allowed_roots_guard() {
        let guard = Arc::new(AllowedRoots::new([PathBuf::from("/work")]));
        let ctx = ToolContext::new(PathBuf::from("/work")).with_path_guard(guard);

        assert!(ctx.check_path(Path::new("notes.md")).is_ok());
        assert!(matches!(
            ctx.check_path(Path::new("/etc/passwd")),
            Err(ToolError::PermissionDenied(_))
        ));
        assert!(ctx.check_path(Path::new("../outside")).is_err());
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        let ctx = ToolContext::default().with_cancellation_token(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_options_serde() {
        let options = ToolOptions::default()
            .with_timeout(Duration::from_secs(2))
            .with_dependency("file_system");
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["timeout"], 2000);
        let back: ToolOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back, options);
        let empty: ToolOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ToolOptions::default());
    }
}
