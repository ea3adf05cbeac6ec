//! Simulator counters readable without the simulator lock.
//!
//! [`SimulatorMetrics`] is a point-in-time snapshot; the live counters are
//! atomics updated by the worker and the control operations.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Snapshot of a simulator's lifetime counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimulatorMetrics {
    /// Formalism units executed, across all replications.
    pub units_executed: u64,
    /// Replications that received START_REPLICATION.
    pub replications_started: u64,
    /// Replications that received END_REPLICATION.
    pub replications_ended: u64,
    /// Replications ended before their configured end time.
    pub forced_early_ends: u64,
    /// Failures caught at the worker boundary or in `initialize`/`step`.
    pub propagation_errors: u64,
    /// Message of the most recent propagation error.
    pub last_propagation_error: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsCounters {
    units_executed: AtomicU64,
    replications_started: AtomicU64,
    replications_ended: AtomicU64,
    forced_early_ends: AtomicU64,
    propagation_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MetricsCounters {
    pub(crate) fn unit_executed(&self) {
        self.units_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn replication_started(&self) {
        self.replications_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn replication_ended(&self) {
        self.replications_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn forced_early_end(&self) {
        self.forced_early_ends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn propagation_error(&self, message: String) {
        self.propagation_errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message);
    }

    pub(crate) fn snapshot(&self) -> SimulatorMetrics {
        SimulatorMetrics {
            units_executed: self.units_executed.load(Ordering::Relaxed),
            replications_started: self.replications_started.load(Ordering::Relaxed),
            replications_ended: self.replications_ended.load(Ordering::Relaxed),
            forced_early_ends: self.forced_early_ends.load(Ordering::Relaxed),
            propagation_errors: self.propagation_errors.load(Ordering::Relaxed),
            last_propagation_error: self.last_error.lock().clone(),
        }
    }
}
