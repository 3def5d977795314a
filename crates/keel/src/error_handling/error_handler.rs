//! Error Handler
//!
//! Runs an asynchronous operation under a retry policy, an optional circuit
//! breaker and a telemetry sink.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::circuit_breaker::{Admission, CircuitBreaker};
use super::context::ErrorContext;
use super::error::AgentError;
use super::retry_policy::RetryPolicy;
use crate::config::{HandlerConfig, RetryConfig};
use crate::telemetry::ErrorTelemetry;

/// Successful outcome plus the number of retries it took
#[derive(Debug, Clone, PartialEq)]
pub struct Handled<T> {
    pub value: T,
    pub retry_count: u32,
}

/// Failed outcome plus the number of retries spent on it
#[derive(Debug, Clone, PartialEq)]
pub struct HandledError {
    pub error: AgentError,
    pub retry_count: u32,
    /// Stopped by the handler's cancellation token. Neither the breaker nor
    /// telemetry saw this outcome.
    pub cancelled: bool,
}

/// Pending half-open trial; handed back to the breaker if dropped unsettled
struct TrialSlot<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl<'a> TrialSlot<'a> {
    fn new(breaker: Option<&'a CircuitBreaker>, admission: Admission) -> Self {
        Self {
            breaker: breaker.filter(|_| admission == Admission::Trial),
        }
    }

    fn settle(&mut self) {
        self.breaker = None;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            if let Err(e) = breaker.release_trial() {
                warn!(error = %e, "Failed to release circuit breaker trial");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorHandler {
    policy: RetryPolicy,
    config: HandlerConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    telemetry: Arc<ErrorTelemetry>,
    cancellation: Option<CancellationToken>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(RetryConfig::default(), HandlerConfig::default())
    }
}

impl ErrorHandler {
    pub fn new(retry: RetryConfig, config: HandlerConfig) -> Self {
        Self {
            policy: RetryPolicy::new(retry),
            config,
            breaker: None,
            telemetry: Arc::new(ErrorTelemetry::new()),
            cancellation: None,
        }
    }

    /// Guard every call with `breaker`
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Append to a shared telemetry sink instead of a private one
    pub fn with_telemetry(mut self, telemetry: Arc<ErrorTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Stop retrying once `token` is cancelled. An outcome observed after
    /// cancellation is returned with `cancelled` set and is not recorded.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn telemetry(&self) -> &Arc<ErrorTelemetry> {
        &self.telemetry
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// retries. The returned error is already sanitized.
    pub async fn handle_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        self.run(ErrorContext::new(operation_name), operation)
            .await
            .map(|handled| handled.value)
            .map_err(|failed| failed.error)
    }

    /// Like [`handle_with_retry`](Self::handle_with_retry), reporting the
    /// retry count on both outcomes.
    pub async fn run<T, F, Fut>(
        &self,
        mut context: ErrorContext,
        mut operation: F,
    ) -> Result<Handled<T>, HandledError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let started = Instant::now();
        let max_retries = self.policy.max_retries();
        let mut attempt: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(self.abandon(AgentError::config("operation cancelled"), context));
            }
            let admission = match self.admit() {
                Ok(Some(admission)) => admission,
                Ok(None) => {
                    self.telemetry.record_circuit_breaker_trigger();
                    let dependency = self.breaker.as_ref().map(|b| b.dependency()).unwrap_or("");
                    return Err(self.fail(AgentError::circuit_open(dependency), context, false));
                }
                Err(e) => return Err(self.fail(e, context, false)),
            };
            let mut trial = TrialSlot::new(self.breaker.as_deref(), admission);

            let outcome = operation().await;
            if self.is_cancelled() {
                let error = match outcome {
                    Ok(_) => AgentError::config("operation cancelled"),
                    Err(error) => error,
                };
                return Err(self.abandon(error, context));
            }

            match outcome {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        let recorded = breaker.record_success();
                        trial.settle();
                        if let Err(e) = recorded {
                            return Err(self.fail(e, context, false));
                        }
                    }
                    self.telemetry.record_success();
                    self.log_success(&context, started.elapsed());
                    return Ok(Handled {
                        value,
                        retry_count: context.retry_count,
                    });
                }
                Err(error) => {
                    // a failed probe must not be retried against a breaker it just reopened
                    let may_retry = admission == Admission::Normal && attempt < max_retries;
                    let delay = if may_retry {
                        self.policy.next_delay(attempt, &error)
                    } else {
                        None
                    };

                    let Some(delay) = delay else {
                        trial.settle();
                        return Err(self.fail(error, context, true));
                    };

                    debug!(
                        operation = %context.operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        kind = %error.kind(),
                        "Retrying after failure"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancelled() => return Err(self.abandon(error, context)),
                    }
                    attempt += 1;
                    context.increment_retry();
                    self.telemetry.record_retry();
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|t| t.is_cancelled())
    }

    async fn cancelled(&self) {
        match &self.cancellation {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }

    fn admit(&self) -> Result<Option<Admission>, AgentError> {
        match &self.breaker {
            Some(breaker) => breaker.try_acquire(),
            None => Ok(Some(Admission::Normal)),
        }
    }

    /// Resolve a final failure; sanitizes exactly once.
    fn fail(&self, error: AgentError, context: ErrorContext, attempted: bool) -> HandledError {
        let retry_count = context.retry_count;
        if attempted {
            if let Some(breaker) = &self.breaker {
                if let Err(e) = breaker.record_failure() {
                    warn!(error = %e, "Failed to record circuit breaker failure");
                }
            }
            self.telemetry.record_error(error.kind());
        }

        let error = error.with_context(context).sanitized();
        warn!(
            operation = %error.context().operation,
            kind = %error.kind(),
            retries = retry_count,
            error = %error,
            "Operation failed"
        );
        HandledError {
            error,
            retry_count,
            cancelled: false,
        }
    }

    /// Resolve a cancelled run without recording it anywhere
    fn abandon(&self, error: AgentError, context: ErrorContext) -> HandledError {
        let retry_count = context.retry_count;
        let error = error.with_context(context).sanitized();
        debug!(
            operation = %error.context().operation,
            retries = retry_count,
            "Operation cancelled, outcome discarded"
        );
        HandledError {
            error,
            retry_count,
            cancelled: true,
        }
    }

    fn log_success(&self, context: &ErrorContext, elapsed: Duration) {
        let slow = elapsed > self.config.slow_operation_threshold;
        if !(self.config.debug || context.retry_count > 0 || slow) {
            return;
        }
        info!(
            operation = %context.operation,
            retries = context.retry_count,
            duration_ms = elapsed.as_millis() as u64,
            slow,
            "Operation succeeded"
        );
    }
}
