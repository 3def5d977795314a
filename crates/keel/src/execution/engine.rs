//! Tool Execution Engine
//!
//! Dispatches tool invocations singly or in batches. Every invocation runs
//! through an [`ErrorHandler`] guarded by the circuit breaker of the tool's
//! dependency; batches run concurrently up to `max_concurrency` bodies and
//! return results in request order.

use futures::future::join_all;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::graph::validate_requests;
use super::request::{ToolExecutionRequest, ToolExecutionResult};
use crate::config::ResilienceConfig;
use crate::error_handling::{
    AgentError, CircuitBreakerRegistry, ErrorContext, ErrorHandler, HandledError,
};
use crate::telemetry::ErrorTelemetry;
use crate::tools::{PathGuard, Tool, ToolContext, ToolRegistry};

type ResultSlot = Option<Arc<ToolExecutionResult>>;

/// How a request ended
enum Settled {
    Done(ToolExecutionResult),
    /// Stopped by batch cancellation before any outcome was recorded
    Abandoned,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct EngineShared {
    registry: Arc<ToolRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    telemetry: Arc<ErrorTelemetry>,
    config: ResilienceConfig,
    semaphore: Arc<Semaphore>,
    working_directory: PathBuf,
    path_guard: Option<Arc<dyn PathGuard>>,
}

#[derive(Clone)]
pub struct ToolExecutionEngine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for ToolExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionEngine")
            .field("registry", &self.shared.registry)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl ToolExecutionEngine {
    /// Build an engine over `registry`; fails if `config` does not validate
    pub fn new(registry: Arc<ToolRegistry>, config: ResilienceConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        Ok(Self::from_parts(
            registry,
            breakers,
            Arc::new(ErrorTelemetry::new()),
            config,
            std::env::current_dir().unwrap_or_default(),
            None,
        ))
    }

    fn from_parts(
        registry: Arc<ToolRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        telemetry: Arc<ErrorTelemetry>,
        config: ResilienceConfig,
        working_directory: PathBuf,
        path_guard: Option<Arc<dyn PathGuard>>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.engine.max_concurrency));
        Self {
            shared: Arc::new(EngineShared {
                registry,
                breakers,
                telemetry,
                config,
                semaphore,
                working_directory,
                path_guard,
            }),
        }
    }

    fn rebuild(&self, f: impl FnOnce(&mut PathBuf, &mut Option<Arc<dyn PathGuard>>)) -> Self {
        let shared = &self.shared;
        let mut working_directory = shared.working_directory.clone();
        let mut path_guard = shared.path_guard.clone();
        f(&mut working_directory, &mut path_guard);
        Self::from_parts(
            Arc::clone(&shared.registry),
            Arc::clone(&shared.breakers),
            Arc::clone(&shared.telemetry),
            shared.config.clone(),
            working_directory,
            path_guard,
        )
    }

    /// Working directory handed to tools through their context
    pub fn with_working_directory(self, dir: PathBuf) -> Self {
        self.rebuild(|wd, _| *wd = dir)
    }

    /// Filesystem guard handed to tools through their context
    pub fn with_path_guard(self, guard: Arc<dyn PathGuard>) -> Self {
        self.rebuild(|_, g| *g = Some(guard))
    }

    /// Share breakers with other engines or handlers
    pub fn with_circuit_breakers(self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        let shared = &self.shared;
        Self::from_parts(
            Arc::clone(&shared.registry),
            breakers,
            Arc::clone(&shared.telemetry),
            shared.config.clone(),
            shared.working_directory.clone(),
            shared.path_guard.clone(),
        )
    }

    pub fn telemetry(&self) -> &Arc<ErrorTelemetry> {
        &self.shared.telemetry
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.shared.breakers
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.shared.config
    }

    /// Execute one request.
    ///
    /// A `parent_execution_id` is recorded on the result but not resolved;
    /// chaining needs [`execute_parallel`](Self::execute_parallel).
    pub async fn execute(&self, request: ToolExecutionRequest) -> ToolExecutionResult {
        let started = Instant::now();
        let token = CancellationToken::new();
        match Arc::clone(&self.shared)
            .run_request(request.clone(), None, token)
            .await
        {
            Settled::Done(result) => result,
            Settled::Abandoned => self.shared.expire(&request, started, "cancelled"),
        }
    }

    /// Execute a batch concurrently, honouring declared dependencies.
    ///
    /// Results come back in request order. The batch is rejected up front,
    /// with no tool body run, if it holds duplicate ids, dependencies
    /// outside the batch, or a dependency cycle. Uses the configured batch
    /// deadline, if any.
    pub async fn execute_parallel(
        &self,
        requests: Vec<ToolExecutionRequest>,
    ) -> Result<Vec<ToolExecutionResult>, AgentError> {
        self.execute_batch(requests, self.shared.config.engine.batch_deadline)
            .await
    }

    /// [`execute_parallel`](Self::execute_parallel) with an explicit deadline
    /// for the whole batch. Invocations unfinished at the deadline resolve
    /// `TimedOut`.
    pub async fn execute_parallel_with_deadline(
        &self,
        requests: Vec<ToolExecutionRequest>,
        deadline: Duration,
    ) -> Result<Vec<ToolExecutionResult>, AgentError> {
        self.execute_batch(requests, Some(deadline)).await
    }

    async fn execute_batch(
        &self,
        requests: Vec<ToolExecutionRequest>,
        deadline: Option<Duration>,
    ) -> Result<Vec<ToolExecutionResult>, AgentError> {
        validate_requests(&requests).map_err(|e| {
            let error = e
                .with_context(ErrorContext::new("execute_parallel").with_metadata(
                    "batch_size",
                    requests.len().to_string(),
                ))
                .sanitized();
            warn!(error = %error, "Rejected tool batch");
            error
        })?;

        info!(batch_size = requests.len(), "Executing tool batch");
        let batch_token = CancellationToken::new();
        let deadline = deadline.map(|d| Instant::now() + d);

        let mut senders: HashMap<String, watch::Sender<ResultSlot>> = HashMap::new();
        let mut receivers: HashMap<String, watch::Receiver<ResultSlot>> = HashMap::new();
        for request in &requests {
            let (tx, rx) = watch::channel(None);
            senders.insert(request.execution_id.clone(), tx);
            receivers.insert(request.execution_id.clone(), rx);
        }

        let mut handles = Vec::with_capacity(requests.len());
        for request in &requests {
            let upstream = request
                .parent_execution_id
                .as_ref()
                .and_then(|parent| receivers.get(parent).cloned());
            let Some(sender) = senders.remove(&request.execution_id) else {
                return Err(AgentError::config(format!(
                    "no result channel for execution '{}'",
                    request.execution_id
                )));
            };
            let shared = Arc::clone(&self.shared);
            let request = request.clone();
            let token = batch_token.child_token();
            let batch_token = batch_token.clone();

            handles.push(AbortOnDrop(tokio::spawn(async move {
                let result = shared
                    .run_with_deadline(request, upstream, token, batch_token, deadline)
                    .await;
                sender.send_replace(Some(Arc::new(result.clone())));
                result
            })));
        }
        drop(receivers);

        let joined = join_all(handles.iter_mut().map(|h| &mut h.0)).await;
        let results = joined
            .into_iter()
            .zip(requests.iter())
            .map(|(outcome, request)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    let error = join_error(&request.tool_name, e).sanitized();
                    self.shared.telemetry.record_error(error.kind());
                    ToolExecutionResult::failure(request, error, Duration::ZERO, 0)
                }
            })
            .collect::<Vec<_>>();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            batch_size = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "Tool batch finished"
        );
        Ok(results)
    }
}

impl EngineShared {
    /// Wait for the upstream result, run, and race the batch deadline
    async fn run_with_deadline(
        self: Arc<Self>,
        request: ToolExecutionRequest,
        upstream: Option<watch::Receiver<ResultSlot>>,
        token: CancellationToken,
        batch_token: CancellationToken,
        deadline: Option<Instant>,
    ) -> ToolExecutionResult {
        let started = Instant::now();
        let run = Arc::clone(&self).run_chained(request.clone(), upstream, token);
        let Some(deadline) = deadline else {
            return match run.await {
                Settled::Done(result) => result,
                Settled::Abandoned => self.expire(&request, started, "cancelled"),
            };
        };

        tokio::pin!(run);
        let settled = tokio::select! {
            settled = &mut run => settled,
            _ = tokio::time::sleep_until(deadline) => {
                batch_token.cancel();
                // give the body a chance to observe cancellation, then drop it
                tokio::time::timeout(self.config.engine.cleanup_window, &mut run)
                    .await
                    .unwrap_or(Settled::Abandoned)
            }
        };
        match settled {
            Settled::Done(result) => result,
            Settled::Abandoned => {
                warn!(execution_id = %request.execution_id, tool = %request.tool_name, "Batch deadline exceeded");
                self.expire(&request, started, "batch deadline exceeded")
            }
        }
    }

    /// Resolve an abandoned request as timed out. The only place its
    /// outcome is counted.
    fn expire(
        &self,
        request: &ToolExecutionRequest,
        started: Instant,
        reason: &str,
    ) -> ToolExecutionResult {
        let error = AgentError::timeout(started.elapsed())
            .with_context(
                ErrorContext::new(format!("tool:{}", request.tool_name))
                    .with_metadata("execution_id", request.execution_id.clone())
                    .with_metadata("reason", reason),
            )
            .sanitized();
        self.telemetry.record_timeout();
        self.telemetry.record_error(error.kind());
        ToolExecutionResult::failure(request, error, started.elapsed(), 0)
    }

    async fn run_chained(
        self: Arc<Self>,
        request: ToolExecutionRequest,
        upstream: Option<watch::Receiver<ResultSlot>>,
        token: CancellationToken,
    ) -> Settled {
        let Some(mut upstream) = upstream else {
            return self.run_request(request, None, token).await;
        };

        let parent = match upstream.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let parent_id = request.parent_execution_id.clone().unwrap_or_default();

        match parent {
            Some(parent) if parent.is_success() => {
                let output = parent.output.clone().unwrap_or(Value::Null);
                self.run_request(request, Some(output), token).await
            }
            Some(parent) => {
                let error = AgentError::tool(
                    &request.tool_name,
                    format!(
                        "upstream execution '{}' finished {}, not run",
                        parent_id, parent.status
                    ),
                    false,
                );
                Settled::Done(self.reject(&request, error, Instant::now()))
            }
            None => {
                let error = AgentError::config(format!(
                    "upstream execution '{}' produced no result",
                    parent_id
                ));
                Settled::Done(self.reject(&request, error, Instant::now()))
            }
        }
    }

    /// Look up, validate, and run one request under retry and breaker
    async fn run_request(
        self: Arc<Self>,
        request: ToolExecutionRequest,
        parent_output: Option<Value>,
        token: CancellationToken,
    ) -> Settled {
        let started = Instant::now();

        let Some(tool) = self.registry.get(&request.tool_name) else {
            let error = AgentError::tool(
                &request.tool_name,
                format!("tool '{}' is not registered", request.tool_name),
                false,
            );
            return Settled::Done(self.reject(&request, error, started));
        };

        let input = request.input_with_parent_output(parent_output.as_ref());
        if let Err(error) = self.registry.validate(&request.tool_name, &input) {
            return Settled::Done(self.reject(&request, error, started));
        }

        let options = tool.options();
        let limit = options.timeout.unwrap_or(self.config.engine.default_timeout);
        let dependency = tool.dependency();
        let breaker = self.breakers.get_or_create(&dependency);
        let handler = ErrorHandler::new(self.config.retry.clone(), self.config.handler.clone())
            .with_circuit_breaker(breaker)
            .with_telemetry(Arc::clone(&self.telemetry))
            .with_cancellation(token.clone());

        let context = ToolContext::new(self.working_directory.clone())
            .with_execution_id(request.execution_id.clone())
            .with_parent_execution_id(request.parent_execution_id.clone())
            .with_cancellation_token(token);
        let context = match &self.path_guard {
            Some(guard) => context.with_path_guard(Arc::clone(guard)),
            None => context,
        };

        debug!(
            execution_id = %request.execution_id,
            tool = %request.tool_name,
            dependency = %dependency,
            timeout_ms = limit.as_millis() as u64,
            "Dispatching tool"
        );

        let outcome = handler
            .run(self.error_context(&request), || {
                let shared = Arc::clone(&self);
                let tool = Arc::clone(&tool);
                let input = input.clone();
                let context = context.clone();
                async move { shared.run_attempt(tool, input, context, limit).await }
            })
            .await;

        match outcome {
            Ok(handled) => Settled::Done(ToolExecutionResult::success(
                &request,
                handled.value,
                started.elapsed(),
                handled.retry_count,
            )),
            Err(HandledError { cancelled: true, .. }) => Settled::Abandoned,
            Err(HandledError {
                error, retry_count, ..
            }) => {
                if matches!(error, AgentError::Timeout { .. }) {
                    self.telemetry.record_timeout();
                }
                Settled::Done(ToolExecutionResult::failure(
                    &request,
                    error,
                    started.elapsed(),
                    retry_count,
                ))
            }
        }
    }

    /// One attempt of the tool body, bounded by `limit`
    async fn run_attempt(
        &self,
        tool: Arc<dyn Tool>,
        input: Value,
        context: ToolContext,
        limit: Duration,
    ) -> Result<Value, AgentError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AgentError::config("execution engine is shut down"))?;

        let attempt_token = context.cancellation_token.child_token();
        let context = context.with_cancellation_token(attempt_token.clone());
        let name = tool.name().to_string();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            tool.execute(input, &context).await
        }));

        match tokio::time::timeout(limit, &mut task.0).await {
            Ok(joined) => match joined {
                Ok(result) => result.map_err(|e| e.into_agent_error(&name)),
                Err(e) => Err(join_error(&name, e)),
            },
            Err(_) => {
                attempt_token.cancel();
                let cleanup = self.config.engine.cleanup_window;
                if tokio::time::timeout(cleanup, &mut task.0).await.is_err() {
                    debug!(tool = %name, "Tool ignored cancellation, aborting");
                }
                Err(AgentError::timeout(limit))
            }
        }
    }

    /// Resolve a request as failed without running its body
    fn reject(
        &self,
        request: &ToolExecutionRequest,
        error: AgentError,
        started: Instant,
    ) -> ToolExecutionResult {
        let error = error.with_context(self.error_context(request)).sanitized();
        warn!(
            execution_id = %request.execution_id,
            tool = %request.tool_name,
            error = %error,
            "Tool request rejected"
        );
        self.telemetry.record_error(error.kind());
        ToolExecutionResult::failure(request, error, started.elapsed(), 0)
    }

    fn error_context(&self, request: &ToolExecutionRequest) -> ErrorContext {
        let mut context = ErrorContext::new(format!("tool:{}", request.tool_name))
            .with_metadata("execution_id", request.execution_id.clone())
            .with_request_snippet(&request.input.to_string());
        if let Some(parent) = &request.parent_execution_id {
            context.add_metadata("parent_execution_id", parent.clone());
        }
        context
    }
}

fn join_error(tool_name: &str, error: JoinError) -> AgentError {
    if error.is_panic() {
        let message = panic_message(error.into_panic());
        AgentError::tool(tool_name, format!("tool panicked: {}", message), false)
    } else {
        AgentError::tool(tool_name, "tool task was cancelled", false)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
