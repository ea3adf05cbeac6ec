//! Views of a simulator handed to formalisms, models and observers.
//!
//! The simulator keeps time, states and the bound replication in a shared
//! view that is readable without the simulator lock, so lifecycle
//! subscribers (which run while the lock is held) can still ask for the
//! current time. Writes only happen while the simulator lock is held.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tempora_core::{
    LifecycleBus, Notification, Payload, ReplicationState, RunState, SimTime, SimulatorEvent,
    StateError, Timeline,
};
use tracing::warn;

use crate::metrics::{MetricsCounters, SimulatorMetrics};
use crate::replication::Replication;
use crate::treatment::RunControl;

// ── Shared view ────────────────────────────────────────────────────

pub(crate) struct SimState<T: Timeline> {
    pub(crate) time: SimTime<T>,
    pub(crate) run_state: RunState,
    pub(crate) replication_state: ReplicationState,
    pub(crate) replication: Option<Arc<Replication<T>>>,
    /// Pause target and whether units at the target still execute.
    pub(crate) run_until: Option<(SimTime<T>, bool)>,
    pub(crate) warmup_fired: bool,
}

/// Work queued by an END_REPLICATION subscriber, run once every
/// subscriber has seen the notification.
pub(crate) type AfterEnd = Box<dyn FnOnce() + Send>;

pub(crate) struct SimView<T: Timeline> {
    pub(crate) state: RwLock<SimState<T>>,
    pub(crate) bus: LifecycleBus<T>,
    pub(crate) metrics: MetricsCounters,
    pub(crate) after_end: Mutex<Vec<AfterEnd>>,
}

impl<T: Timeline> SimView<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(SimState {
                time: SimTime::zero(),
                run_state: RunState::NotInitialized,
                replication_state: ReplicationState::NotInitialized,
                replication: None,
                run_until: None,
                warmup_fired: false,
            }),
            bus: LifecycleBus::new(),
            metrics: MetricsCounters::default(),
            after_end: Mutex::new(Vec::new()),
        }
    }

    /// Publish END_REPLICATION, then run whatever its subscribers queued.
    pub(crate) fn publish_end_replication(&self, payload: Payload) {
        self.publish(SimulatorEvent::EndReplication, payload);
        // Queued work may queue more.
        loop {
            let queued = std::mem::take(&mut *self.after_end.lock());
            if queued.is_empty() {
                break;
            }
            for work in queued {
                work();
            }
        }
    }

    /// Publish `kind` stamped with the current time.
    pub(crate) fn publish(&self, kind: SimulatorEvent, payload: Payload) {
        let time = self.state.read().time;
        self.bus
            .publish(kind, &Notification::new(kind, time).with_payload(payload));
    }

    /// Move time forward to `to`, publishing TIME_CHANGED when it moves.
    pub(crate) fn set_time(&self, to: SimTime<T>) -> Result<(), StateError> {
        {
            let mut state = self.state.write();
            if to < state.time {
                return Err(StateError::TimeReversal);
            }
            if to == state.time {
                return Ok(());
            }
            state.time = to;
        }
        self.publish(SimulatorEvent::TimeChanged, Payload::None);
        Ok(())
    }

    /// Fire WARMUP unless it already fired in this replication.
    pub(crate) fn fire_warmup(&self) -> bool {
        {
            let mut state = self.state.write();
            if state.warmup_fired {
                return false;
            }
            state.warmup_fired = true;
        }
        self.publish(SimulatorEvent::Warmup, Payload::None);
        true
    }

    /// Mark the replication as ending, clamping time to the end time.
    pub(crate) fn end_replication(&self) {
        let clamped = {
            let mut state = self.state.write();
            if state.replication_state.is_ending_or_ended() {
                return;
            }
            let Some(replication) = state.replication.clone() else {
                return;
            };
            state.replication_state = ReplicationState::Ending;
            let end = replication.treatment().end_time();
            if state.time < end {
                let from = state.time;
                state.time = end;
                Some((replication, from, end))
            } else {
                None
            }
        };
        if let Some((replication, from, end)) = clamped {
            warn!(
                replication = %replication.id(),
                time = ?from,
                end = ?end,
                "replication ended before its end time; clamping time forward"
            );
            self.metrics.forced_early_end();
            self.publish(SimulatorEvent::TimeChanged, Payload::None);
        }
    }
}

pub(crate) fn replication_payload<T: Timeline>(replication: &Replication<T>) -> Payload {
    Payload::Replication {
        index: replication.index(),
        id: replication.shared_id(),
    }
}

// ── SimulatorHandle ────────────────────────────────────────────────

/// Cheap, clonable, read-mostly handle to a simulator.
///
/// Statistics collectors and other observers hold one of these instead of
/// the simulator itself. Reads never take the simulator lock.
pub struct SimulatorHandle<T: Timeline> {
    view: Arc<SimView<T>>,
}

impl<T: Timeline> Clone for SimulatorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            view: Arc::clone(&self.view),
        }
    }
}

impl<T: Timeline> SimulatorHandle<T> {
    pub(crate) fn from_view(view: &Arc<SimView<T>>) -> Self {
        Self {
            view: Arc::clone(view),
        }
    }

    /// Current simulated time.
    pub fn time(&self) -> SimTime<T> {
        self.view.state.read().time
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        self.view.state.read().run_state
    }

    /// Current replication state.
    pub fn replication_state(&self) -> ReplicationState {
        self.view.state.read().replication_state
    }

    /// The bound replication.
    pub fn replication(&self) -> Option<Arc<Replication<T>>> {
        self.view.state.read().replication.clone()
    }

    /// Whether WARMUP already fired in the bound replication.
    pub fn warmup_fired(&self) -> bool {
        self.view.state.read().warmup_fired
    }

    /// `Starting` or `Started`.
    pub fn is_starting_or_running(&self) -> bool {
        self.run_state().is_starting_or_running()
    }

    /// `Stopping` or `Stopped`.
    pub fn is_stopping_or_stopped(&self) -> bool {
        self.run_state().is_stopping_or_stopped()
    }

    /// The lifecycle notification registry.
    pub fn events(&self) -> &LifecycleBus<T> {
        &self.view.bus
    }

    /// Snapshot of the simulator's counters.
    pub fn metrics(&self) -> SimulatorMetrics {
        self.view.metrics.snapshot()
    }
}

impl<T: Timeline> fmt::Debug for SimulatorHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.view.state.read();
        f.debug_struct("SimulatorHandle")
            .field("time", &state.time)
            .field("run_state", &state.run_state)
            .field("replication_state", &state.replication_state)
            .finish()
    }
}

// ── StepContext ────────────────────────────────────────────────────

/// What a formalism sees while executing one unit.
///
/// Created by the simulator for each call to
/// [`Formalism::step`](crate::Formalism::step); the simulator lock is held
/// for its whole lifetime.
pub struct StepContext<'a, T: Timeline> {
    view: &'a Arc<SimView<T>>,
    replication: Arc<Replication<T>>,
    stop: &'a AtomicBool,
}

impl<'a, T: Timeline> StepContext<'a, T> {
    pub(crate) fn new(
        view: &'a Arc<SimView<T>>,
        replication: Arc<Replication<T>>,
        stop: &'a AtomicBool,
    ) -> Self {
        Self {
            view,
            replication,
            stop,
        }
    }

    /// Current simulated time.
    pub fn time(&self) -> SimTime<T> {
        self.view.state.read().time
    }

    /// Advance simulated time to `to` and publish TIME_CHANGED.
    ///
    /// Setting the current time again is a no-op; moving backwards fails
    /// with [`StateError::TimeReversal`].
    pub fn set_time(&mut self, to: SimTime<T>) -> Result<(), StateError> {
        self.view.set_time(to)
    }

    /// Fire WARMUP now. Returns `false` if it already fired.
    pub fn warmup(&mut self) -> bool {
        self.view.fire_warmup()
    }

    /// End the replication after this unit.
    ///
    /// Called before the configured end time, this logs a warning and
    /// moves time forward to the end time. It never fails.
    pub fn end_replication(&mut self) {
        self.view.end_replication();
    }

    /// Ask the run loop to stop after this unit.
    pub fn request_stop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// The bound replication.
    pub fn replication(&self) -> &Arc<Replication<T>> {
        &self.replication
    }

    /// The replication's timing parameters.
    pub fn treatment(&self) -> &RunControl<T> {
        self.replication.treatment()
    }

    /// The lifecycle notification registry.
    pub fn events(&self) -> &LifecycleBus<T> {
        &self.view.bus
    }

    /// A handle for observers created during the step.
    pub fn simulator(&self) -> SimulatorHandle<T> {
        SimulatorHandle::from_view(self.view)
    }
}

// ── ModelContext ───────────────────────────────────────────────────

/// What a model sees while constructing itself for a replication.
pub struct ModelContext<'a, T: Timeline> {
    handle: SimulatorHandle<T>,
    replication: &'a Arc<Replication<T>>,
}

impl<'a, T: Timeline> ModelContext<'a, T> {
    pub(crate) fn new(handle: SimulatorHandle<T>, replication: &'a Arc<Replication<T>>) -> Self {
        Self {
            handle,
            replication,
        }
    }

    /// The replication being constructed.
    pub fn replication(&self) -> &Arc<Replication<T>> {
        self.replication
    }

    /// Its timing parameters.
    pub fn treatment(&self) -> &RunControl<T> {
        self.replication.treatment()
    }

    /// Simulated time, equal to the treatment's start time.
    pub fn time(&self) -> SimTime<T> {
        self.handle.time()
    }

    /// Handle for statistics and observers.
    pub fn simulator(&self) -> &SimulatorHandle<T> {
        &self.handle
    }

    /// The lifecycle notification registry.
    pub fn events(&self) -> &LifecycleBus<T> {
        self.handle.events()
    }
}
