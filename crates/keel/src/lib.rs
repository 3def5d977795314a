//! Keel
//!
//! Resilient tool execution core for AI agents: classifies failures,
//! retries with backoff, trips per-dependency circuit breakers, runs tool
//! batches concurrently with ordered results, and turns results into
//! follow-up actions for the conversation loop.
//!
//! ```no_run
//! use std::sync::Arc;
//! use keel::{FeedbackManager, ResilienceConfig, ToolExecutionEngine, ToolRegistry};
//!
//! # async fn run(registry: ToolRegistry) -> Result<(), keel::AgentError> {
//! let config = ResilienceConfig::default().with_env_overrides();
//! let engine = ToolExecutionEngine::new(Arc::new(registry), config.clone())?;
//! let feedback = FeedbackManager::new(&config);
//!
//! let results = engine.execute_parallel(vec![]).await?;
//! for result in &results {
//!     for action in feedback.process_result(result) {
//!         println!("{action:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error_handling;
pub mod execution;
pub mod feedback;
pub mod logging;
pub mod telemetry;
pub mod tools;

pub use config::ResilienceConfig;
pub use error_handling::{AgentError, AgentErrorKind, ErrorContext, ErrorHandler};
pub use execution::{ExecutionStatus, ToolExecutionEngine, ToolExecutionRequest, ToolExecutionResult};
pub use feedback::{FeedbackManager, FollowUpAction, StatusLevel};
pub use telemetry::{ErrorTelemetry, TelemetrySnapshot};
pub use tools::{Tool, ToolContext, ToolError, ToolRegistry};
