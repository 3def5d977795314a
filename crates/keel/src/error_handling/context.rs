//! Error Context
//!
//! Structured diagnostic record attached to every [`AgentError`].
//! One context is created per logical operation and travels with it
//! through every retry; only the retry counter changes afterwards.
//!
//! [`AgentError`]: super::AgentError

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::telemetry::{sanitize_map, sanitize_string};

/// Characters of the originating request kept for correlation
pub const REQUEST_SNIPPET_CHARS: usize = 20;

/// Context information for an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// Name of the logical operation (e.g. "tool:read_file", "claude_api")
    pub operation: String,
    /// Additional context data, in insertion order
    pub metadata: IndexMap<String, String>,
    /// Number of retries performed so far
    pub retry_count: u32,
    /// When the operation chain started
    pub created_at: DateTime<Utc>,
    /// Leading characters of the request payload
    pub request_snippet: Option<String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new("")
    }
}

impl ErrorContext {
    /// Create a new context for an operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            metadata: IndexMap::new(),
            retry_count: 0,
            created_at: Utc::now(),
            request_snippet: None,
        }
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_metadata(key, value);
        self
    }

    /// Add metadata in place; re-adding a key keeps its original position
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Set the retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Record the leading characters of the request payload
    pub fn with_request_snippet(mut self, request: &str) -> Self {
        self.request_snippet = Some(request.chars().take(REQUEST_SNIPPET_CHARS).collect());
        self
    }

    pub(crate) fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Fold another context into this one.
    ///
    /// Metadata from `other` is appended after ours; our operation name,
    /// timestamp and retry count win.
    pub(crate) fn absorb(&mut self, other: ErrorContext) {
        if self.operation.is_empty() {
            self.operation = other.operation;
        }
        for (key, value) in other.metadata {
            self.metadata.entry(key).or_insert(value);
        }
        if self.request_snippet.is_none() {
            self.request_snippet = other.request_snippet;
        }
    }

    /// Copy with every string scrubbed
    pub fn sanitized(&self) -> Self {
        Self {
            operation: sanitize_string(&self.operation),
            metadata: sanitize_map(&self.metadata),
            retry_count: self.retry_count,
            created_at: self.created_at,
            request_snippet: self.request_snippet.as_deref().map(sanitize_string),
        }
    }

    /// Check if context has any information
    pub fn is_empty(&self) -> bool {
        self.operation.is_empty() && self.metadata.is_empty() && self.request_snippet.is_none()
    }
}
