//! Simulator and experiment configuration.
//!
//! Both structs are plain data with a [`validate()`](SimulatorConfig::validate)
//! pass; constructors that consume them call `validate()` first.

use std::time::Duration;

use tempora_core::{ConfigError, Timeline};

use crate::treatment::RunControl;

// ── SimulatorConfig ────────────────────────────────────────────────

/// Configuration for a [`Simulator`](crate::Simulator).
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Name given to the worker thread. Default: `"tempora-worker"`.
    pub worker_name: String,
    /// How long a control operation waits for the simulator lock before
    /// failing with [`StateError::LockTimeout`](tempora_core::StateError::LockTimeout).
    /// Default: 5 s.
    pub control_lock_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            worker_name: "tempora-worker".into(),
            control_lock_timeout: Duration::from_secs(5),
        }
    }
}

impl SimulatorConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::EmptyId {
                field: "worker name",
            });
        }
        if self.control_lock_timeout.is_zero() {
            return Err(ConfigError::InvalidLockTimeout);
        }
        Ok(())
    }
}

// ── ExperimentConfig ───────────────────────────────────────────────

/// Configuration for an [`Experiment`](crate::Experiment).
#[derive(Clone, Debug)]
pub struct ExperimentConfig<T: Timeline> {
    /// Experiment identifier; replication ids are derived from it.
    pub id: String,
    /// Free-text description.
    pub description: String,
    /// Timing template copied into every replication.
    pub treatment: RunControl<T>,
    /// Number of replications to run. Must be at least 1.
    pub replications: usize,
    /// Seed from which every replication's random streams derive.
    pub base_seed: u64,
}

impl<T: Timeline> ExperimentConfig<T> {
    /// A configuration with an empty description and seed 0.
    pub fn new(id: impl Into<String>, treatment: RunControl<T>, replications: usize) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            treatment,
            replications,
            base_seed: 0,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyId {
                field: "experiment id",
            });
        }
        if self.replications == 0 {
            return Err(ConfigError::NoReplications);
        }
        Ok(())
    }
}
