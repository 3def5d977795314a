//! Telemetry
//!
//! Error counters shared by concurrent invocations, plus the sanitizer every
//! outward-facing string goes through.

mod metrics;
pub mod sanitizer;

pub use metrics::*;
pub use sanitizer::{is_sensitive_field, sanitize_map, sanitize_string, sanitize_value, REDACTED};
