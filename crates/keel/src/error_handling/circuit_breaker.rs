//! Circuit Breaker
//!
//! Per-dependency state machine that stops issuing calls to a backend after
//! repeated consecutive failures, then probes it with a single trial call
//! once the cooldown has elapsed.
//!
//! ```text
//! Closed --(threshold failures)--> Open --(open_duration)--> HalfOpen
//!   ^                                ^                          |
//!   +---------(trial succeeds)-------+------(trial fails)-------+
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{info, warn};

use super::error::AgentError;
use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed
    Normal,
    /// The single probe allowed while half-open
    Trial,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    trips: u64,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Times the circuit has opened since creation or the last reset
    pub trips: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                trips: 0,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    fn lock(&self) -> Result<MutexGuard<'_, BreakerState>, AgentError> {
        self.inner
            .lock()
            .map_err(|_| AgentError::lock_poisoned(&format!("circuit breaker '{}'", self.dependency)))
    }

    /// Ask to run one call.
    ///
    /// `Ok(None)` means the call is rejected. Once the cooldown has elapsed,
    /// exactly one caller receives [`Admission::Trial`]; everyone else is
    /// turned away until that trial is recorded.
    pub fn try_acquire(&self) -> Result<Option<Admission>, AgentError> {
        let mut inner = self.lock()?;
        match inner.state {
            CircuitState::Closed => Ok(Some(Admission::Normal)),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if !cooled_down {
                    return Ok(None);
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(dependency = %self.dependency, "Circuit breaker half-open, allowing trial call");
                Ok(Some(Admission::Trial))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Ok(None);
                }
                inner.trial_in_flight = true;
                Ok(Some(Admission::Trial))
            }
        }
    }

    /// Whether a call may proceed now.
    ///
    /// This is an admission: a `true` answer while half-open consumes the
    /// trial slot. A poisoned lock answers `false`.
    pub fn can_execute(&self) -> bool {
        matches!(self.try_acquire(), Ok(Some(_)))
    }

    pub fn record_success(&self) -> Result<(), AgentError> {
        let mut inner = self.lock()?;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(dependency = %self.dependency, "Circuit breaker closed, dependency recovered");
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            // late result from a call admitted before the circuit opened
            CircuitState::Open => {}
        }
        Ok(())
    }

    pub fn record_failure(&self) -> Result<(), AgentError> {
        let mut inner = self.lock()?;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    /// Give back a trial slot whose call ended without an outcome, so the
    /// next caller may probe instead. No-op outside a pending trial.
    pub fn release_trial(&self) -> Result<(), AgentError> {
        let mut inner = self.lock()?;
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            info!(dependency = %self.dependency, "Trial call abandoned, slot released");
        }
        Ok(())
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trips += 1;
        warn!(
            dependency = %self.dependency,
            consecutive_failures = inner.consecutive_failures,
            open_ms = self.config.open_duration.as_millis() as u64,
            "Circuit breaker opened"
        );
    }

    pub fn state(&self) -> Result<CircuitState, AgentError> {
        Ok(self.lock()?.state)
    }

    pub fn snapshot(&self) -> Result<CircuitBreakerSnapshot, AgentError> {
        let inner = self.lock()?;
        Ok(CircuitBreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trips: inner.trips,
        })
    }

    /// Force the breaker back to a fresh closed state
    pub fn reset(&self) -> Result<(), AgentError> {
        let mut inner = self.lock()?;
        *inner = BreakerState {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            trips: 0,
        };
        info!(dependency = %self.dependency, "Circuit breaker reset");
        Ok(())
    }
}

/// Breakers keyed by dependency, created on first use
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config.clone())))
            .value()
            .clone()
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| Arc::clone(b.value()))
    }

    /// Snapshots of every breaker, sorted by dependency
    pub fn snapshot(&self) -> Result<Vec<CircuitBreakerSnapshot>, AgentError> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut snapshots = breakers
            .iter()
            .map(|b| b.snapshot())
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        Ok(snapshots)
    }

    /// Reset one breaker; returns `false` when the key is unknown
    pub fn reset(&self, dependency: &str) -> Result<bool, AgentError> {
        match self.get(dependency) {
            Some(breaker) => {
                breaker.reset()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "claude_api",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(30)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = breaker(3);
        for _ in 0..2 {
            cb.record_failure().unwrap();
            assert!(cb.can_execute());
        }
        cb.record_failure().unwrap();
        assert_eq!(cb.state().unwrap(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker(3);
        cb.record_failure().unwrap();
        cb.record_failure().unwrap();
        cb.record_success().unwrap();
        cb.record_failure().unwrap();
        cb.record_failure().unwrap();
        assert_eq!(cb.state().unwrap(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_trial() {
        let cb = breaker(1);
        cb.record_failure().unwrap();
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.try_acquire().unwrap(), Some(Admission::Trial));
        assert_eq!(cb.state().unwrap(), CircuitState::HalfOpen);
        assert_eq!(cb.try_acquire().unwrap(), None);

        cb.record_success().unwrap();
        assert_eq!(cb.state().unwrap(), CircuitState::Closed);
        assert_eq!(cb.try_acquire().unwrap(), Some(Admission::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = breaker(1);
        cb.record_failure().unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());

        cb.record_failure().unwrap();
        assert_eq!(cb.state().unwrap(), CircuitState::Open);
        assert!(!cb.can_execute());

        // cooldown restarts from the failed trial
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_execute());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.snapshot().unwrap().trips, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_trial_admits_next_caller() {
        let cb = breaker(1);
        cb.record_failure().unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.try_acquire().unwrap(), Some(Admission::Trial));
        assert_eq!(cb.try_acquire().unwrap(), None);

        cb.release_trial().unwrap();
        assert_eq!(cb.state().unwrap(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().unwrap().trips, 1);
        assert_eq!(cb.try_acquire().unwrap(), Some(Admission::Trial));

        cb.record_success().unwrap();
        // nothing pending any more
        cb.release_trial().unwrap();
        assert_eq!(cb.state().unwrap(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_half_open_admits_one() {
        let cb = Arc::new(CircuitBreaker::new(
            "file_system",
            CircuitBreakerConfig::new(1, Duration::ZERO),
        ));
        cb.record_failure().unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || cb.can_execute())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_poisoned_lock_becomes_config_error() {
        let cb = Arc::new(breaker(1));
        let poisoner = Arc::clone(&cb);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(matches!(cb.record_failure(), Err(AgentError::Config { .. })));
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_registry_scopes_by_dependency() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        let api = registry.get_or_create("claude_api");
        let fs = registry.get_or_create("file_system");
        assert!(Arc::ptr_eq(&api, &registry.get_or_create("claude_api")));

        api.record_failure().unwrap();
        assert!(!api.can_execute());
        assert!(fs.can_execute());

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].dependency, "claude_api");
        assert_eq!(snapshot[0].state, CircuitState::Open);
        assert_eq!(snapshot[1].state, CircuitState::Closed);

        assert!(registry.reset("claude_api").unwrap());
        assert!(api.can_execute());
        assert!(!registry.reset("unknown").unwrap());
    }
}
