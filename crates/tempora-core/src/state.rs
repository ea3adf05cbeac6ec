//! Run and replication state enums shared by the simulator and its errors.

use std::fmt;

/// Execution state of a simulator's run loop.
///
/// ```text
/// NotInitialized --initialize--> Initialized --start--> Starting
///   Starting --worker--> Started --stop--> Stopping --worker--> Stopped
///   Stopped | Initialized --start--> Starting
///   Started --end of replication--> Ended
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No replication has been bound yet.
    NotInitialized,
    /// A replication is bound and the model is constructed.
    Initialized,
    /// `start()` was accepted; the worker has not yet picked it up.
    Starting,
    /// The worker is executing the run loop.
    Started,
    /// `stop()` was accepted; the worker finishes its current unit.
    Stopping,
    /// The worker returned to waiting without ending the replication.
    Stopped,
    /// The bound replication has completed.
    Ended,
}

impl RunState {
    /// `Starting` or `Started`.
    pub fn is_starting_or_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }

    /// `Stopping` or `Stopped`.
    pub fn is_stopping_or_stopped(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Initialized => "INITIALIZED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Ended => "ENDED",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of the replication bound to a simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplicationState {
    /// No replication bound.
    NotInitialized,
    /// Bound, not yet started.
    Initialized,
    /// Started at least once.
    Started,
    /// The formalism signalled completion; the worker has not finalized.
    Ending,
    /// Finalized; END_REPLICATION has been published.
    Ended,
}

impl ReplicationState {
    /// `Ending` or `Ended`.
    pub fn is_ending_or_ended(self) -> bool {
        matches!(self, Self::Ending | Self::Ended)
    }
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Initialized => "INITIALIZED",
            Self::Started => "STARTED",
            Self::Ending => "ENDING",
            Self::Ended => "ENDED",
        };
        f.write_str(s)
    }
}
