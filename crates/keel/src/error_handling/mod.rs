//! Error Handling
//!
//! Failure taxonomy, retry policy, circuit breakers, and the handler that
//! combines them around an asynchronous operation.
//!
//! # Features
//!
//! - **Taxonomy**: [`AgentError`] with a fixed retryability per kind
//! - **Backoff**: exponential delay with a jitter band, honouring server hints
//! - **Circuit breaking**: one breaker per dependency key
//! - **Orchestration**: [`ErrorHandler::handle_with_retry`]

mod circuit_breaker;
mod context;
mod error;
mod error_handler;
mod retry_policy;

#[cfg(test)]
mod error_handling_property_tests;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitState,
};
pub use context::{ErrorContext, REQUEST_SNIPPET_CHARS};
pub use error::{parse_retry_after, AgentError, AgentErrorKind};
pub use error_handler::{ErrorHandler, Handled, HandledError};
pub use retry_policy::RetryPolicy;
