//! Resilience configuration
//!
//! One configuration object is built at startup and passed explicitly into
//! the handler, breaker registry, engine and feedback manager. Nothing here
//! is global.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error_handling::AgentError;

pub const ENV_MAX_RETRIES: &str = "KEEL_MAX_RETRIES";
pub const ENV_MAX_CONCURRENCY: &str = "KEEL_MAX_CONCURRENCY";
pub const ENV_DEBUG: &str = "KEEL_DEBUG";
pub const ENV_FAILURE_THRESHOLD: &str = "KEEL_FAILURE_THRESHOLD";

/// Largest accepted upper bound of the retry jitter factor
pub const MAX_JITTER: f64 = 2.0;

/// Retry and backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt; an operation runs at most `max_retries + 1` times
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Lower bound of the jitter factor
    pub jitter_min: f64,
    /// Upper bound of the jitter factor
    pub jitter_max: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_min: 0.8,
            jitter_max: 1.2,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Disable jitter; delays become deterministic
    pub fn without_jitter(self) -> Self {
        self.with_jitter(1.0, 1.0)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= 1.0 {
            return Err(AgentError::config(format!(
                "retry.backoff_multiplier must be greater than 1, got {}",
                self.backoff_multiplier
            )));
        }
        let band_ok = self.jitter_min > 0.0
            && self.jitter_min <= 1.0
            && self.jitter_max >= 1.0
            && self.jitter_max <= MAX_JITTER;
        if !band_ok {
            return Err(AgentError::config(format!(
                "retry jitter band [{}, {}] must satisfy 0 < min <= 1 <= max <= {}",
                self.jitter_min, self.jitter_max, MAX_JITTER
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(AgentError::config(
                "retry.max_delay must not be smaller than retry.base_delay",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker settings, shared by every dependency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown before a trial call is let through
    #[serde(with = "duration_ms")]
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HandlerConfig {
    /// Log every successful operation
    pub debug: bool,
    /// Successful operations slower than this are logged
    #[serde(with = "duration_ms")]
    pub slow_operation_threshold: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            slow_operation_threshold: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Tool bodies allowed to run at the same time
    pub max_concurrency: usize,
    /// Deadline for tools that do not declare their own
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Grace period a timed-out body gets to observe cancellation
    #[serde(with = "duration_ms")]
    pub cleanup_window: Duration,
    /// Deadline for a whole `execute_parallel` batch
    #[serde(with = "duration_ms::option")]
    pub batch_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_timeout: Duration::from_secs(120),
            cleanup_window: Duration::from_millis(500),
            batch_deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FeedbackConfig {
    /// Timeouts of one tool, within `timeout_window`, that trigger escalation
    pub timeout_escalation_count: usize,
    #[serde(with = "duration_ms")]
    pub timeout_window: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            timeout_escalation_count: 3,
            timeout_window: Duration::from_secs(300),
        }
    }
}

/// Complete configuration of the execution core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub handler: HandlerConfig,
    pub engine: EngineConfig,
    pub feedback: FeedbackConfig,
}

impl ResilienceConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AgentError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AgentError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Apply `KEEL_*` environment overrides.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_value::<u32>(ENV_MAX_RETRIES) {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_value::<usize>(ENV_MAX_CONCURRENCY) {
            self.engine.max_concurrency = v;
        }
        if let Some(v) = env_flag(ENV_DEBUG) {
            self.handler.debug = v;
        }
        if let Some(v) = env_value::<u32>(ENV_FAILURE_THRESHOLD) {
            self.circuit_breaker.failure_threshold = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        self.retry.validate()?;
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AgentError::config(
                "circuit_breaker.failure_threshold must be at least 1",
            ));
        }
        if self.engine.max_concurrency == 0 {
            return Err(AgentError::config("engine.max_concurrency must be at least 1"));
        }
        Ok(())
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Durations as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration
                .map(|d| d.as_millis() as u64)
                .serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}
