//! Error telemetry counters
//!
//! Counters only grow during normal operation. Writes are single atomic
//! increments; readers take a [`TelemetrySnapshot`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::error_handling::AgentErrorKind;

#[derive(Debug, Default)]
pub struct ErrorTelemetry {
    total_errors: AtomicU64,
    successful_operations: AtomicU64,
    total_retries: AtomicU64,
    circuit_breaker_triggers: AtomicU64,
    timeouts: AtomicU64,
    errors_by_kind: DashMap<AgentErrorKind, u64>,
}

/// Serializable copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub total_errors: u64,
    pub successful_operations: u64,
    pub total_retries: u64,
    pub circuit_breaker_triggers: u64,
    pub timeouts: u64,
    pub errors_by_kind: BTreeMap<AgentErrorKind, u64>,
}

impl TelemetrySnapshot {
    /// Share of resolved operations that succeeded; `None` before any resolved
    pub fn success_rate(&self) -> Option<f64> {
        let resolved = self.successful_operations + self.total_errors;
        if resolved == 0 {
            return None;
        }
        Some(self.successful_operations as f64 / resolved as f64)
    }
}

impl ErrorTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.successful_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a final, unrecovered error
    pub fn record_error(&self, kind: AgentErrorKind) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        *self.errors_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trigger(&self) {
        self.circuit_breaker_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn successful_operations(&self) -> u64 {
        self.successful_operations.load(Ordering::Relaxed)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_breaker_triggers(&self) -> u64 {
        self.circuit_breaker_triggers.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            total_errors: self.total_errors(),
            successful_operations: self.successful_operations(),
            total_retries: self.total_retries(),
            circuit_breaker_triggers: self.circuit_breaker_triggers(),
            timeouts: self.timeouts(),
            errors_by_kind: self
                .errors_by_kind
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
        }
    }

    /// Zero every counter. Operator action only.
    pub fn reset(&self) {
        self.total_errors.store(0, Ordering::Relaxed);
        self.successful_operations.store(0, Ordering::Relaxed);
        self.total_retries.store(0, Ordering::Relaxed);
        self.circuit_breaker_triggers.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.errors_by_kind.clear();
        info!("Error telemetry reset");
    }
}
