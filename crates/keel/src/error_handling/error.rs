//! Error Taxonomy
//!
//! Closed set of failure kinds raised by the execution core. Retryability is
//! a fixed property of the kind, except for tool failures, where the tool
//! reports it.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::context::ErrorContext;
use crate::telemetry::sanitize_string;

/// Error kinds for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// Operation exceeded its deadline
    Timeout,
    /// Remote dependency throttled the caller
    RateLimit,
    /// Remote API answered with an error status
    RemoteApiFailure,
    /// Input failed schema or field validation
    Validation,
    /// Tool body failed
    ToolExecution,
    /// Misconfiguration, open circuit, or broken internal state
    Configuration,
}

impl AgentErrorKind {
    /// All kinds, in declaration order
    pub const ALL: [AgentErrorKind; 6] = [
        AgentErrorKind::Timeout,
        AgentErrorKind::RateLimit,
        AgentErrorKind::RemoteApiFailure,
        AgentErrorKind::Validation,
        AgentErrorKind::ToolExecution,
        AgentErrorKind::Configuration,
    ];
}

impl std::fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentErrorKind::Timeout => write!(f, "timeout"),
            AgentErrorKind::RateLimit => write!(f, "rate_limit"),
            AgentErrorKind::RemoteApiFailure => write!(f, "remote_api_failure"),
            AgentErrorKind::Validation => write!(f, "validation"),
            AgentErrorKind::ToolExecution => write!(f, "tool_execution"),
            AgentErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Error raised by the execution core.
///
/// Every variant carries the [`ErrorContext`] of the operation that produced
/// it. Display text is raw; call [`AgentError::sanitized`] before the error
/// leaves the process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("Operation timed out after {}ms", duration.as_millis())]
    Timeout {
        duration: Duration,
        context: ErrorContext,
    },

    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
        context: ErrorContext,
    },

    #[error("API error {status_code}: {message}")]
    Api {
        status_code: u16,
        message: String,
        error_type: Option<String>,
        context: ErrorContext,
    },

    #[error("Validation failed for '{field}': {message}")]
    Validation {
        field: String,
        message: String,
        context: ErrorContext,
    },

    #[error("Tool '{tool_name}' failed: {message}")]
    Tool {
        tool_name: String,
        message: String,
        retryable: bool,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: ErrorContext,
    },
}

impl AgentError {
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            duration,
            context: ErrorContext::default(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
            context: ErrorContext::default(),
        }
    }

    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
            error_type: None,
            context: ErrorContext::default(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
            retryable,
            context: ErrorContext::default(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Rejection issued while a dependency's breaker is open
    pub fn circuit_open(dependency: &str) -> Self {
        Self::config(format!("circuit breaker open for '{}'", dependency))
            .with_context(ErrorContext::new("circuit_breaker").with_metadata("dependency", dependency))
    }

    /// Raised when a shared lock was poisoned by a panicking holder
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        Self::config(format!("internal state lock poisoned: {}", what))
    }

    /// Classify a failed HTTP response from a remote dependency.
    ///
    /// 429 is a rate limit, 408 a timeout, 5xx a retryable API failure and
    /// any other status a permanent API failure.
    pub fn from_http_status(
        status_code: u16,
        message: impl Into<String>,
        error_type: Option<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = message.into();
        match status_code {
            429 => Self::rate_limit(message, retry_after),
            408 => Self::Timeout {
                duration: Duration::ZERO,
                context: ErrorContext::new("http").with_metadata("detail", message),
            },
            _ => Self::Api {
                status_code,
                message,
                error_type,
                context: ErrorContext::default(),
            },
        }
    }

    pub fn kind(&self) -> AgentErrorKind {
        match self {
            Self::Timeout { .. } => AgentErrorKind::Timeout,
            Self::RateLimit { .. } => AgentErrorKind::RateLimit,
            Self::Api { .. } => AgentErrorKind::RemoteApiFailure,
            Self::Validation { .. } => AgentErrorKind::Validation,
            Self::Tool { .. } => AgentErrorKind::ToolExecution,
            Self::Config { .. } => AgentErrorKind::Configuration,
        }
    }

    /// Check if this error may succeed when the operation is re-run
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            Self::Tool { retryable, .. } => *retryable,
            Self::Validation { .. } | Self::Config { .. } => false,
        }
    }

    /// Server-provided delay hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Timeout { context, .. }
            | Self::RateLimit { context, .. }
            | Self::Api { context, .. }
            | Self::Validation { context, .. }
            | Self::Tool { context, .. }
            | Self::Config { context, .. } => context,
        }
    }

    pub fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Timeout { context, .. }
            | Self::RateLimit { context, .. }
            | Self::Api { context, .. }
            | Self::Validation { context, .. }
            | Self::Tool { context, .. }
            | Self::Config { context, .. } => context,
        }
    }

    /// Attach an operation context; whatever the error already carried is
    /// folded in behind it.
    pub fn with_context(mut self, mut context: ErrorContext) -> Self {
        let previous = std::mem::take(self.context_mut());
        context.absorb(previous);
        *self.context_mut() = context;
        self
    }

    /// Copy with every message and context field scrubbed.
    pub fn sanitized(&self) -> Self {
        match self {
            Self::Timeout { duration, context } => Self::Timeout {
                duration: *duration,
                context: context.sanitized(),
            },
            Self::RateLimit {
                message,
                retry_after,
                context,
            } => Self::RateLimit {
                message: sanitize_string(message),
                retry_after: *retry_after,
                context: context.sanitized(),
            },
            Self::Api {
                status_code,
                message,
                error_type,
                context,
            } => Self::Api {
                status_code: *status_code,
                message: sanitize_string(message),
                error_type: error_type.as_deref().map(sanitize_string),
                context: context.sanitized(),
            },
            Self::Validation {
                field,
                message,
                context,
            } => Self::Validation {
                field: sanitize_string(field),
                message: sanitize_string(message),
                context: context.sanitized(),
            },
            Self::Tool {
                tool_name,
                message,
                retryable,
                context,
            } => Self::Tool {
                tool_name: sanitize_string(tool_name),
                message: sanitize_string(message),
                retryable: *retryable,
                context: context.sanitized(),
            },
            Self::Config { message, context } => Self::Config {
                message: sanitize_string(message),
                context: context.sanitized(),
            },
        }
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after(header: &str) -> Option<Duration> {
    let header = header.trim();
    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = chrono::DateTime::parse_from_rfc2822(header).ok()?;
    let remaining = date.signed_duration_since(chrono::Utc::now());
    // a date in the past means "retry now"
    Some(remaining.to_std().unwrap_or(Duration::ZERO))
}
