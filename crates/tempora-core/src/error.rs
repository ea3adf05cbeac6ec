//! Error types for the Tempora simulation core.
//!
//! Three families, matching how each is surfaced:
//!
//! - [`ConfigError`]: invalid construction parameters, reported synchronously.
//! - [`StateError`]: an operation invoked in an illegal run or replication
//!   state, reported synchronously.
//! - [`PropagationError`]: a failure inside model or formalism code. Caught
//!   at the worker boundary and logged; the worker returns to waiting.
//!
//! [`SimError`] wraps all three for operations that can fail more than one way.

use thiserror::Error;

use crate::state::{ReplicationState, RunState};

/// Invalid construction parameters for a treatment, experiment, or simulator.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Run length is zero or negative.
    #[error("run length must be positive, got {value}")]
    NonPositiveRunLength {
        /// Debug rendering of the rejected length.
        value: String,
    },
    /// Warmup length is negative.
    #[error("warmup length must not be negative, got {value}")]
    NegativeWarmup {
        /// Debug rendering of the rejected length.
        value: String,
    },
    /// Warmup length is not shorter than the run.
    #[error("warmup length {warmup} must be shorter than run length {run}")]
    WarmupNotShorterThanRun {
        /// Debug rendering of the warmup length.
        warmup: String,
        /// Debug rendering of the run length.
        run: String,
    },
    /// A time parameter is NaN or infinite.
    #[error("{field} must be finite")]
    NonFinite {
        /// Which parameter was rejected.
        field: &'static str,
    },
    /// An identifier is empty.
    #[error("{field} must not be empty")]
    EmptyId {
        /// Which identifier was rejected.
        field: &'static str,
    },
    /// An experiment was configured with zero replications.
    #[error("number of replications must be at least 1")]
    NoReplications,
    /// The simulator control-lock timeout is zero.
    #[error("control lock timeout must be positive")]
    InvalidLockTimeout,
    /// A statistic description is already bound in the replication.
    #[error("statistic '{description}' is already bound in replication '{replication}'")]
    DuplicateStatistic {
        /// The colliding description.
        description: String,
        /// Identifier of the replication.
        replication: String,
    },
    /// The worker thread could not be spawned.
    #[error("thread spawn failed: {reason}")]
    ThreadSpawnFailed {
        /// OS-level reason.
        reason: String,
    },
}

/// An operation was invoked in a state that does not permit it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StateError {
    /// The run state forbids the operation.
    #[error("cannot {operation} while run state is {state}")]
    InvalidRunState {
        /// The rejected operation.
        operation: &'static str,
        /// Run state at the time of the call.
        state: RunState,
    },
    /// The replication state forbids the operation.
    #[error("cannot {operation} while replication state is {state}")]
    InvalidReplicationState {
        /// The rejected operation.
        operation: &'static str,
        /// Replication state at the time of the call.
        state: ReplicationState,
    },
    /// No replication is bound to the simulator.
    #[error("cannot {operation}: no replication bound")]
    NoReplication {
        /// The rejected operation.
        operation: &'static str,
    },
    /// Simulated time already reached the replication end time.
    #[error("cannot {operation}: simulated time has reached the end of the run")]
    EndOfRun {
        /// The rejected operation.
        operation: &'static str,
    },
    /// The requested run-until time is not after the current time.
    #[error("run-until time must lie after the current simulated time")]
    RunUntilInPast,
    /// A formalism tried to move simulated time backwards.
    #[error("simulated time may not move backwards")]
    TimeReversal,
    /// The simulator lock could not be acquired in time.
    #[error("timed out after {timeout_ms}ms waiting for the simulator lock")]
    LockTimeout {
        /// The configured timeout.
        timeout_ms: u64,
    },
    /// A control operation was called from inside a formalism step.
    #[error("cannot {operation} from inside a formalism step")]
    Reentrant {
        /// The rejected operation.
        operation: &'static str,
    },
    /// The simulator has been cleaned up.
    #[error("simulator has been cleaned up")]
    ShutDown,
    /// The experiment is already executing replications.
    #[error("experiment is already running")]
    ExperimentRunning,
    /// Every configured replication has been executed.
    #[error("all {count} replications have been executed")]
    ReplicationsExhausted {
        /// Configured replication count.
        count: usize,
    },
}

/// A failure inside model or formalism code.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PropagationError {
    /// A hook returned an error.
    #[error("{hook} failed: {reason}")]
    HookFailed {
        /// The failing hook (formalism or model name plus phase).
        hook: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A hook panicked; the panic was caught at the worker boundary.
    #[error("{hook} panicked: {message}")]
    Panicked {
        /// The failing hook.
        hook: String,
        /// Panic payload, if it was a string.
        message: String,
    },
    /// A hook violated a simulator invariant.
    #[error("{hook}: {source}")]
    State {
        /// The failing hook.
        hook: String,
        /// The violated invariant.
        #[source]
        source: StateError,
    },
}

impl PropagationError {
    /// Convenience constructor for [`PropagationError::HookFailed`].
    pub fn failed(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HookFailed {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`PropagationError::Panicked`] from a caught panic payload.
    pub fn from_panic(hook: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked {
            hook: hook.into(),
            message,
        }
    }
}

/// Any error the simulation core can report.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SimError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Illegal state for the operation.
    #[error(transparent)]
    State(#[from] StateError),
    /// Failure inside model or formalism code.
    #[error(transparent)]
    Propagation(#[from] PropagationError),
}
