//! Retry Policy
//!
//! Exponential backoff with a multiplicative jitter band. Rate-limit hints
//! from the failing dependency replace the computed delay.

use rand::Rng;
use std::time::Duration;

use super::error::AgentError;
use crate::config::{RetryConfig, MAX_JITTER};

/// Computes the delay before the next attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Un-jittered delay for a zero-based attempt index, capped at `max_delay`
    pub fn theoretical_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = base * self.config.backoff_multiplier.powi(exponent);
        if !delay.is_finite() || delay >= max {
            return self.config.max_delay;
        }
        Duration::try_from_secs_f64(delay).unwrap_or(self.config.base_delay)
    }

    /// Delay before retrying after `error` on the given attempt.
    ///
    /// Returns `None` when the error kind must not be retried. Attempt count
    /// limits are enforced by the caller.
    pub fn next_delay(&self, attempt: u32, error: &AgentError) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        if let Some(hint) = error.retry_after() {
            return Some(hint);
        }

        let theoretical = self.theoretical_delay(attempt);
        Some(self.apply_jitter(theoretical))
    }

    /// Random factor from the jitter band, clamped to `(0, MAX_JITTER]`.
    /// A band that is not a usable range means no jitter.
    fn jitter_factor(&self) -> f64 {
        let (min, max) = (self.config.jitter_min, self.config.jitter_max);
        if !min.is_finite() || !max.is_finite() || min <= 0.0 {
            return 1.0;
        }
        let factor = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        factor.min(MAX_JITTER)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let jittered = Duration::try_from_secs_f64(delay.as_secs_f64() * self.jitter_factor())
            .unwrap_or(self.config.max_delay);
        jittered.min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::new(3, Duration::from_millis(100)).without_jitter())
    }

    #[test]
    fn test_exponential_sequence() {
        let policy = deterministic();
        let error = AgentError::timeout(Duration::from_secs(1));
        let delays: Vec<_> = (0..4)
            .map(|i| policy.next_delay(i, &error).unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new(
            RetryConfig::new(10, Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(500))
                .without_jitter(),
        );
        assert_eq!(policy.theoretical_delay(10), Duration::from_millis(500));
        assert_eq!(policy.theoretical_delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_non_retryable_kinds_short_circuit() {
        let policy = deterministic();
        assert_eq!(policy.next_delay(0, &AgentError::validation("x", "bad")), None);
        assert_eq!(policy.next_delay(0, &AgentError::config("bad")), None);
        assert_eq!(policy.next_delay(0, &AgentError::api(404, "missing")), None);
        assert_eq!(policy.next_delay(0, &AgentError::tool("t", "logic", false)), None);
    }

    #[test]
    fn test_rate_limit_hint_overrides_backoff() {
        let policy = deterministic();
        let error = AgentError::rate_limit("slow down", Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(0, &error), Some(Duration::from_secs(5)));

        let no_hint = AgentError::rate_limit("slow down", None);
        assert_eq!(policy.next_delay(1, &no_hint), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_unvalidated_config_never_panics() {
        let error = AgentError::timeout(Duration::from_secs(1));
        let max_delay = Duration::from_secs(30);
        let configs = [
            RetryConfig::new(3, Duration::from_secs(1)).with_jitter(0.8, 1e300),
            RetryConfig::new(3, Duration::from_secs(1)).with_jitter(f64::NAN, f64::NAN),
            RetryConfig::new(3, Duration::from_secs(1)).with_jitter(-2.0, -1.0),
            RetryConfig::new(3, Duration::from_secs(1)).with_multiplier(-3.0),
            RetryConfig::new(3, Duration::from_secs(1)).with_multiplier(f64::NAN),
        ];
        for config in configs {
            let policy = RetryPolicy::new(config);
            for attempt in 0..4 {
                let delay = policy.next_delay(attempt, &error).unwrap();
                assert!(delay <= max_delay);
            }
        }
    }

    #[test]
    fn test_jitter_within_band() {
        let policy = RetryPolicy::new(RetryConfig::new(3, Duration::from_millis(1000)));
        let error = AgentError::api(502, "bad gateway");
        for _ in 0..200 {
            let delay = policy.next_delay(1, &error).unwrap();
            assert!(delay >= Duration::from_millis(1600));
            assert!(delay <= Duration::from_millis(2400));
        }
    }
}
