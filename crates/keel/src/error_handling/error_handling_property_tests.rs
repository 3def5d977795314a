//! Property-based tests for error handling
//!
//! Backoff monotonicity and cap, jitter bounds, retry ceiling, and breaker
//! thresholds.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::error::AgentError;
use super::error_handler::ErrorHandler;
use super::retry_policy::RetryPolicy;
use crate::config::{CircuitBreakerConfig, HandlerConfig, RetryConfig};

/// Strategy for generating retryable errors without a server hint
fn retryable_error_strategy() -> impl Strategy<Value = AgentError> {
    prop_oneof![
        (1u64..60).prop_map(|s| AgentError::timeout(Duration::from_secs(s))),
        Just(AgentError::rate_limit("slow down", None)),
        (500u16..600).prop_map(|status| AgentError::api(status, "server error")),
        "[a-z_]{1,12}".prop_map(|name| AgentError::tool(name, "transient", true)),
    ]
}

fn non_retryable_error_strategy() -> impl Strategy<Value = AgentError> {
    prop_oneof![
        "[a-z]{1,10}".prop_map(|f| AgentError::validation(f, "invalid")),
        "[a-z ]{1,20}".prop_map(AgentError::config),
        (400u16..429).prop_map(|status| AgentError::api(status, "client error")),
        "[a-z_]{1,12}".prop_map(|name| AgentError::tool(name, "logic error", false)),
    ]
}

/// Strategy for generating valid retry configurations
fn retry_config_strategy() -> impl Strategy<Value = RetryConfig> {
    (1u64..2_000, 1u64..120, 1.1f64..4.0, 0.5f64..=1.0, 1.0f64..1.5).prop_map(
        |(base_ms, cap_factor, multiplier, jitter_min, jitter_max)| {
            RetryConfig::new(3, Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(base_ms * cap_factor))
                .with_multiplier(multiplier)
                .with_jitter(jitter_min, jitter_max)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Un-jittered delays never shrink and never exceed the cap
    #[test]
    fn prop_backoff_is_monotonic_and_capped(
        config in retry_config_strategy(),
        attempts in 1u32..40,
    ) {
        let policy = RetryPolicy::new(config.clone());
        let mut previous = Duration::ZERO;
        for attempt in 0..attempts {
            let delay = policy.theoretical_delay(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= config.max_delay);
            if delay < config.max_delay && attempt > 0 {
                prop_assert!(delay > previous);
            }
            previous = delay;
        }
    }

    /// Jittered delays stay inside the configured band around the theoretical value
    #[test]
    fn prop_jitter_within_band(
        config in retry_config_strategy(),
        attempt in 0u32..20,
        error in retryable_error_strategy(),
    ) {
        let policy = RetryPolicy::new(config.clone());
        let theoretical = policy.theoretical_delay(attempt).as_secs_f64();
        let delay = policy.next_delay(attempt, &error).unwrap().as_secs_f64();
        let slack = 1e-6;
        prop_assert!(delay >= theoretical * config.jitter_min - slack);
        prop_assert!(delay <= theoretical * config.jitter_max + slack);
        prop_assert!(delay <= config.max_delay.as_secs_f64() + slack);
    }

    #[test]
    fn prop_non_retryable_never_delays(
        config in retry_config_strategy(),
        attempt in 0u32..10,
        error in non_retryable_error_strategy(),
    ) {
        let policy = RetryPolicy::new(config);
        prop_assert_eq!(policy.next_delay(attempt, &error), None);
    }

    /// Server hints win regardless of attempt
    #[test]
    fn prop_rate_limit_hint_is_verbatim(
        config in retry_config_strategy(),
        attempt in 0u32..10,
        hint_ms in 0u64..600_000,
    ) {
        let policy = RetryPolicy::new(config);
        let hint = Duration::from_millis(hint_ms);
        let error = AgentError::rate_limit("429", Some(hint));
        prop_assert_eq!(policy.next_delay(attempt, &error), Some(hint));
    }

    /// An always-failing retryable operation runs exactly max_retries + 1 times
    #[test]
    fn prop_retry_ceiling(
        max_retries in 0u32..6,
        error in retryable_error_strategy(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let calls = rt.block_on(async {
            let handler = ErrorHandler::new(
                RetryConfig::new(max_retries, Duration::from_millis(5)),
                HandlerConfig::default(),
            );
            let calls = AtomicU32::new(0);
            let result = handler
                .handle_with_retry("always_fails", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let error = error.clone();
                    async move { Err::<(), _>(error) }
                })
                .await;
            assert!(result.is_err());
            calls.load(Ordering::SeqCst)
        });
        prop_assert_eq!(calls, max_retries + 1);
    }

    /// Exactly `failure_threshold` consecutive failures open the circuit
    #[test]
    fn prop_breaker_opens_at_threshold(threshold in 1u32..20) {
        let breaker = Arc::new(CircuitBreaker::new(
            "dep",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(3600)),
        ));
        for _ in 0..threshold - 1 {
            breaker.record_failure().unwrap();
            prop_assert_eq!(breaker.state().unwrap(), CircuitState::Closed);
            prop_assert!(breaker.can_execute());
        }
        breaker.record_failure().unwrap();
        prop_assert_eq!(breaker.state().unwrap(), CircuitState::Open);
        prop_assert!(!breaker.can_execute());
    }
}
