//! The simulator's worker thread and the per-unit run loop.
//!
//! Control operations hand work to the worker through a single-slot
//! crossbeam channel. The worker takes the simulator lock for each unit and
//! yields it between units, so `stop()` from another thread is honoured
//! after the unit in progress.
//!
//! ```text
//! control thread                      worker thread
//!   start(): lock, STARTING,            recv() go
//!            try_send(go) ───────────►  lock, STARTED, START
//!                                       loop: execute_unit, bump lock
//!   stop():  lock, STOPPING, flag ───►  sees flag after its unit
//!                                       STOPPED | ENDED, STOP,
//!                                       END_REPLICATION (if ended)
//! ```

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, ReentrantMutexGuard};
use tempora_core::{
    Payload, PropagationError, ReplicationState, RunState, SimTime, SimulatorEvent, StateError,
    Timeline,
};
use tracing::{debug, error, warn};

use crate::context::{replication_payload, SimView, StepContext};
use crate::formalism::Formalism;
use crate::simulator::Shared;

/// How often a worker blocked on the simulator lock re-checks shutdown.
const LOCK_POLL: Duration = Duration::from_millis(50);

// ── Go signal ──────────────────────────────────────────────────────

/// Single-slot "go" signal plus an idle barrier.
pub(crate) struct WorkerSignal {
    go: Mutex<Option<Sender<()>>>,
    pending: Mutex<u64>,
    idle: Condvar,
}

impl WorkerSignal {
    pub(crate) fn new(go: Sender<()>) -> Self {
        Self {
            go: Mutex::new(Some(go)),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Queue one go signal without blocking.
    pub(crate) fn send(&self) -> Result<(), StateError> {
        let go = self.go.lock();
        let Some(tx) = go.as_ref() else {
            return Err(StateError::ShutDown);
        };
        *self.pending.lock() += 1;
        match tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.done();
                match err {
                    TrySendError::Full(()) => Err(StateError::InvalidRunState {
                        operation: "start",
                        state: RunState::Starting,
                    }),
                    TrySendError::Disconnected(()) => Err(StateError::ShutDown),
                }
            }
        }
    }

    /// One go signal has been fully handled.
    pub(crate) fn done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Drop the sender so the worker's `recv` fails once drained.
    pub(crate) fn close(&self) {
        self.go.lock().take();
    }

    /// Block until every queued signal has been handled.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

// ── Worker thread ──────────────────────────────────────────────────

pub(crate) fn worker_loop<T: Timeline, F: Formalism<T>>(shared: Arc<Shared<T, F>>, go: Receiver<()>) {
    debug!(worker = %shared.config.worker_name, "worker started");
    while go.recv().is_ok() {
        if !shared.shut_down.load(Ordering::Acquire) {
            run_until_stopped(&shared);
        }
        shared.signal.done();
    }
    debug!(worker = %shared.config.worker_name, "worker exiting");
}

fn lock_or_shutdown<T: Timeline, F>(
    shared: &Shared<T, F>,
) -> Option<ReentrantMutexGuard<'_, RefCell<F>>> {
    loop {
        if let Some(guard) = shared.semaphore.try_lock_for(LOCK_POLL) {
            return Some(guard);
        }
        if shared.shut_down.load(Ordering::Acquire) {
            return None;
        }
    }
}

fn run_until_stopped<T: Timeline, F: Formalism<T>>(shared: &Shared<T, F>) {
    let Some(mut guard) = lock_or_shutdown(shared) else {
        return;
    };
    {
        let mut state = shared.view.state.write();
        match state.run_state {
            RunState::Starting => state.run_state = RunState::Started,
            // stop() arrived before the worker picked the signal up.
            RunState::Stopping => {}
            other => {
                warn!(state = %other, "go signal ignored");
                return;
            }
        }
    }
    shared.view.publish(SimulatorEvent::Start, Payload::None);

    let outcome = loop {
        if shared.stop_requested.load(Ordering::Acquire) {
            break Ok(UnitOutcome::Paused);
        }
        let unit = match guard.try_borrow_mut() {
            Ok(mut formalism) => execute_unit(shared, &mut formalism),
            Err(_) => Err(reentrant("run")),
        };
        match unit {
            Ok(UnitOutcome::Boundary | UnitOutcome::Stepped) => {}
            other => break other,
        }
        ReentrantMutexGuard::bump(&mut guard);
    };

    // The error was already logged and counted; the worker goes back to waiting.
    let _ = finish_run(shared, outcome);
    drop(guard);
}

// ── Units ──────────────────────────────────────────────────────────

/// Result of one pass of the run loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnitOutcome {
    /// A replication boundary (warmup) was handled; no formalism unit ran.
    Boundary,
    /// One formalism unit ran.
    Stepped,
    /// Stopped at a run-until target or on request.
    Paused,
    /// The replication is ending.
    Ended,
}

fn reentrant(operation: &'static str) -> PropagationError {
    PropagationError::State {
        hook: "simulator".into(),
        source: StateError::Reentrant { operation },
    }
}

/// Advance by one boundary or one formalism unit. Caller holds the lock.
pub(crate) fn execute_unit<T: Timeline, F: Formalism<T>>(
    shared: &Shared<T, F>,
    formalism: &mut F,
) -> Result<UnitOutcome, PropagationError> {
    let view = &shared.view;
    let (replication, run_until, warmup_fired, ending) = {
        let state = view.state.read();
        (
            state.replication.clone(),
            state.run_until,
            state.warmup_fired,
            state.replication_state.is_ending_or_ended(),
        )
    };
    let Some(replication) = replication else {
        return Err(PropagationError::State {
            hook: formalism.name().to_owned(),
            source: StateError::NoReplication { operation: "run" },
        });
    };
    if ending {
        return Ok(UnitOutcome::Ended);
    }

    let treatment = replication.treatment();
    let end = treatment.end_time();
    let next = formalism.next_time();
    // Whether the next unit lies at/after `t` (or strictly after, when
    // units at `t` still belong before the boundary). No next unit counts
    // as beyond everything.
    let beyond = |t: SimTime<T>, inclusive: bool| match next {
        None => true,
        Some(n) if inclusive => n > t,
        Some(n) => n >= t,
    };
    let until = run_until.filter(|(u, _)| *u < end);

    if !warmup_fired {
        let warmup = treatment.warmup_time();
        let paused_first = until.is_some_and(|(u, inclusive)| u < warmup || (u == warmup && !inclusive));
        if !paused_first && beyond(warmup, false) {
            advance_to(view, warmup, formalism.name())?;
            view.fire_warmup();
            return Ok(UnitOutcome::Boundary);
        }
    }

    if let Some((target, inclusive)) = until {
        if beyond(target, inclusive) {
            advance_to(view, target, formalism.name())?;
            view.state.write().run_until = None;
            return Ok(UnitOutcome::Paused);
        }
    }

    if beyond(end, true) {
        advance_to(view, end, formalism.name())?;
        view.end_replication();
        return Ok(UnitOutcome::Ended);
    }

    let result = {
        let mut ctx = StepContext::new(view, Arc::clone(&replication), &shared.stop_requested);
        catch_unwind(AssertUnwindSafe(|| formalism.step(&mut ctx)))
    };
    view.metrics.unit_executed();
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(payload) => return Err(PropagationError::from_panic(formalism.name(), payload.as_ref())),
    }

    if view.state.read().replication_state.is_ending_or_ended() {
        Ok(UnitOutcome::Ended)
    } else {
        Ok(UnitOutcome::Stepped)
    }
}

fn advance_to<T: Timeline>(view: &SimView<T>, to: SimTime<T>, hook: &str) -> Result<(), PropagationError> {
    if to <= view.state.read().time {
        return Ok(());
    }
    view.set_time(to).map_err(|source| PropagationError::State {
        hook: hook.to_owned(),
        source,
    })
}

/// Settle states after a run or a step and publish STOP, then
/// END_REPLICATION if the replication completed. Caller holds the lock
/// and no formalism borrow.
pub(crate) fn finish_run<T: Timeline, F>(
    shared: &Shared<T, F>,
    outcome: Result<UnitOutcome, PropagationError>,
) -> Result<(), PropagationError> {
    let view = &shared.view;
    let ended = matches!(outcome, Ok(UnitOutcome::Ended));
    let replication = {
        let mut state = view.state.write();
        state.run_until = None;
        if ended {
            state.run_state = RunState::Ended;
            state.replication_state = ReplicationState::Ended;
        } else {
            state.run_state = RunState::Stopped;
        }
        state.replication.clone()
    };
    shared.stop_requested.store(false, Ordering::Release);

    if let Err(err) = &outcome {
        error!(
            replication = replication.as_ref().map_or("-", |r| r.id()),
            error = %err,
            "propagation error; run stopped"
        );
        view.metrics.propagation_error(err.to_string());
    }

    view.publish(SimulatorEvent::Stop, Payload::None);
    if ended {
        view.metrics.replication_ended();
        let payload = replication
            .as_deref()
            .map_or(Payload::None, replication_payload);
        debug!(time = ?view.state.read().time, "replication ended");
        view.publish_end_replication(payload);
    }
    outcome.map(|_| ())
}
