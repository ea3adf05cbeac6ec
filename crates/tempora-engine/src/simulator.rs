//! The simulator: run/replication state machine and control operations.
//!
//! Every control operation (`initialize`, `start`, `run_up_to*`, `step`,
//! `stop`) takes the simulator lock, a [`ReentrantMutex`] shared with the
//! worker's per-unit body. Lifecycle notifications are published while
//! the lock is held, so observers always see them in order. Because the
//! lock is re-entrant, an END_REPLICATION subscriber running on the worker
//! may call `initialize` and `start` for the next replication; a control
//! call made from inside a formalism unit fails with
//! [`StateError::Reentrant`] instead.

use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tempora_core::{
    ConfigError, LifecycleBus, Payload, PropagationError, ReplicationState, RunState, SimError,
    SimTime, SimulatorEvent, StateError, SubscriptionScope, Timeline,
};
use tracing::{debug, error};

use crate::config::SimulatorConfig;
use crate::context::{replication_payload, ModelContext, SimState, SimView, SimulatorHandle};
use crate::formalism::{Formalism, Model};
use crate::metrics::SimulatorMetrics;
use crate::replication::Replication;
use crate::worker::{self, UnitOutcome, WorkerSignal};

pub(crate) struct Shared<T: Timeline, F> {
    pub(crate) semaphore: ReentrantMutex<RefCell<F>>,
    pub(crate) view: Arc<SimView<T>>,
    pub(crate) signal: WorkerSignal,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) shut_down: AtomicBool,
    pub(crate) worker_thread: OnceLock<ThreadId>,
    pub(crate) config: SimulatorConfig,
}

/// A simulator bound to one formalism and one worker thread.
///
/// ```text
/// NotInitialized --initialize--> Initialized --start--> Starting
/// Starting --worker--> Started --stop--> Stopping --worker--> Stopped
/// Initialized | Stopped --start | step--> ...
/// Started --end of replication--> Ended --initialize--> Initialized
/// ```
pub struct Simulator<T: Timeline, F: Formalism<T>> {
    shared: Arc<Shared<T, F>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Timeline, F: Formalism<T>> Simulator<T, F> {
    /// Create a simulator and spawn its worker thread.
    pub fn new(formalism: F, config: SimulatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (go_tx, go_rx) = crossbeam_channel::bounded(1);
        let shared = Arc::new(Shared {
            semaphore: ReentrantMutex::new(RefCell::new(formalism)),
            view: Arc::new(SimView::new()),
            signal: WorkerSignal::new(go_tx),
            stop_requested: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            worker_thread: OnceLock::new(),
            config,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(shared.config.worker_name.clone())
            .spawn(move || worker::worker_loop(worker_shared, go_rx))
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: e.to_string(),
            })?;
        let _ = shared.worker_thread.set(handle.thread().id());

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Handle for observers; cheap to clone, never takes the lock.
    pub fn handle(&self) -> SimulatorHandle<T> {
        SimulatorHandle::from_view(&self.shared.view)
    }

    /// Current simulated time.
    pub fn time(&self) -> SimTime<T> {
        self.shared.view.state.read().time
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        self.shared.view.state.read().run_state
    }

    /// Current replication state.
    pub fn replication_state(&self) -> ReplicationState {
        self.shared.view.state.read().replication_state
    }

    /// The bound replication.
    pub fn replication(&self) -> Option<Arc<Replication<T>>> {
        self.shared.view.state.read().replication.clone()
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
        &self.shared.view.bus
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> SimulatorMetrics {
        self.shared.view.metrics.snapshot()
    }

    /// The configuration the simulator was built with.
    pub fn config(&self) -> &SimulatorConfig {
        &self.shared.config
    }

    /// Whether [`cleanup`](Self::cleanup) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Inspect the formalism under the simulator lock.
    pub fn with_formalism<R>(&self, f: impl FnOnce(&F) -> R) -> Result<R, StateError> {
        let guard = self.acquire()?;
        let formalism = guard.try_borrow().map_err(|_| StateError::Reentrant {
            operation: "inspect formalism",
        })?;
        Ok(f(&formalism))
    }

    /// Block until the worker has handled every queued start, including
    /// starts queued by subscribers while it ran. Returns `false` on
    /// timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.shared.signal.wait_idle(timeout)
    }

    // ── Control ────────────────────────────────────────────────────

    /// Bind `replication`, reset time to its start, and construct `model`.
    ///
    /// Clears replication-scoped subscriptions left by the previous
    /// replication. Fails while the simulator is starting or running.
    pub fn initialize(
        &self,
        replication: Replication<T>,
        model: &mut dyn Model<T, F>,
    ) -> Result<(), SimError> {
        self.reject_if_running("initialize")?;
        let guard = self.acquire()?;
        self.reject_if_running("initialize")?;
        let mut formalism = guard.try_borrow_mut().map_err(|_| StateError::Reentrant {
            operation: "initialize",
        })?;

        let view = &self.shared.view;
        let cleared = view.bus.clear_scope(SubscriptionScope::Replication);
        let replication = Arc::new(replication);
        let start = replication.treatment().start_time();
        {
            let mut state = view.state.write();
            state.time = start;
            state.replication = Some(Arc::clone(&replication));
            state.run_until = None;
            state.warmup_fired = false;
            state.run_state = RunState::NotInitialized;
            state.replication_state = ReplicationState::NotInitialized;
        }
        self.shared.stop_requested.store(false, Ordering::Release);
        formalism.reset(start);

        let ctx = ModelContext::new(self.handle(), &replication);
        let constructed = catch_unwind(AssertUnwindSafe(|| model.construct(&ctx, &mut formalism)))
            .unwrap_or_else(|payload| {
                Err(PropagationError::from_panic(
                    "model.construct",
                    payload.as_ref(),
                ))
            });
        if let Err(err) = constructed {
            error!(replication = %replication.id(), error = %err, "model construction failed");
            view.metrics.propagation_error(err.to_string());
            view.state.write().replication = None;
            return Err(err.into());
        }

        {
            let mut state = view.state.write();
            state.run_state = RunState::Initialized;
            state.replication_state = ReplicationState::Initialized;
        }
        debug!(
            replication = %replication.id(),
            time = ?start,
            cleared_subscriptions = cleared,
            "simulator initialized"
        );
        Ok(())
    }

    /// Run until the end of the replication.
    pub fn start(&self) -> Result<(), StateError> {
        self.launch("start", None)
    }

    /// Run until just before `time`: units scheduled at `time` do not run.
    pub fn run_up_to(&self, time: SimTime<T>) -> Result<(), StateError> {
        self.launch("run up to", Some((time, false)))
    }

    /// Run until `time`, executing units scheduled at `time`.
    pub fn run_up_to_and_including(&self, time: SimTime<T>) -> Result<(), StateError> {
        self.launch("run up to and including", Some((time, true)))
    }

    /// Execute exactly one formalism unit synchronously on the caller's
    /// thread, with START and STOP around it.
    ///
    /// Warmup and end-of-replication boundaries met on the way are
    /// handled as part of the step. The run state is `Stopped` (or `Ended`)
    /// afterwards even when the unit fails.
    pub fn step(&self) -> Result<(), SimError> {
        self.reject_if_running("step")?;
        let guard = self.acquire()?;
        if guard.try_borrow_mut().is_err() {
            return Err(StateError::Reentrant { operation: "step" }.into());
        }
        let first = {
            let mut state = self.shared.view.state.write();
            Self::check_startable("step", &state)?;
            state.run_until = None;
            state.run_state = RunState::Started;
            Self::begin_replication(&mut state)
        };
        self.shared.stop_requested.store(false, Ordering::Release);
        self.announce_replication(first);
        self.shared.view.publish(SimulatorEvent::Start, Payload::None);

        let outcome = loop {
            let unit = match guard.try_borrow_mut() {
                Ok(mut formalism) => worker::execute_unit(&self.shared, &mut formalism),
                Err(_) => Err(PropagationError::State {
                    hook: "simulator".into(),
                    source: StateError::Reentrant { operation: "step" },
                }),
            };
            match unit {
                Ok(UnitOutcome::Boundary) => {}
                Ok(UnitOutcome::Stepped) => break Ok(UnitOutcome::Paused),
                other => break other,
            }
        };
        worker::finish_run(&self.shared, outcome)?;
        Ok(())
    }

    /// Ask the worker to halt after its current unit.
    pub fn stop(&self) -> Result<(), StateError> {
        let _guard = self.acquire()?;
        {
            let mut state = self.shared.view.state.write();
            if !state.run_state.is_starting_or_running() {
                return Err(StateError::InvalidRunState {
                    operation: "stop",
                    state: state.run_state,
                });
            }
            state.run_state = RunState::Stopping;
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared
            .view
            .publish(SimulatorEvent::Stopping, Payload::None);
        debug!("stop requested");
        Ok(())
    }

    /// Halt the worker, drop every subscription and release the thread.
    ///
    /// Idempotent. Every later control operation fails with
    /// [`StateError::ShutDown`]. Called on the worker thread itself (from a
    /// subscriber), the thread is detached instead of joined.
    pub fn cleanup(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.signal.close();
        self.shared.view.bus.clear();
        self.shared.view.after_end.lock().clear();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if thread::current().id() == handle.thread().id() {
                debug!("cleanup on the worker thread; detaching");
            } else if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        // Bound statistics hold handles back to the view.
        let replication = self.shared.view.state.write().replication.take();
        if let Some(replication) = replication {
            replication.statistics().clear();
        }
        debug!("simulator cleaned up");
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Queue `work` to run once the END_REPLICATION being published has
    /// reached every subscriber. Only meaningful from inside such a
    /// subscriber.
    pub(crate) fn after_end_replication(&self, work: impl FnOnce() + Send + 'static) {
        self.shared.view.after_end.lock().push(Box::new(work));
    }

    fn acquire(&self) -> Result<ReentrantMutexGuard<'_, RefCell<F>>, StateError> {
        if self.is_shut_down() {
            return Err(StateError::ShutDown);
        }
        let timeout = self.shared.config.control_lock_timeout;
        self.shared
            .semaphore
            .try_lock_for(timeout)
            .ok_or(StateError::LockTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }

    fn reject_if_running(&self, operation: &'static str) -> Result<(), StateError> {
        let state = self.run_state();
        if state.is_starting_or_running() || state == RunState::Stopping {
            return Err(StateError::InvalidRunState { operation, state });
        }
        Ok(())
    }

    fn check_startable(operation: &'static str, state: &SimState<T>) -> Result<(), StateError> {
        if state.run_state.is_starting_or_running() || state.run_state == RunState::Stopping {
            return Err(StateError::InvalidRunState {
                operation,
                state: state.run_state,
            });
        }
        let Some(replication) = &state.replication else {
            return Err(StateError::NoReplication { operation });
        };
        if state.replication_state.is_ending_or_ended()
            || state.time >= replication.treatment().end_time()
        {
            return Err(StateError::EndOfRun { operation });
        }
        if !matches!(state.run_state, RunState::Initialized | RunState::Stopped) {
            return Err(StateError::InvalidRunState {
                operation,
                state: state.run_state,
            });
        }
        Ok(())
    }

    /// Move a fresh replication to `Started`; returns it on its first start.
    fn begin_replication(state: &mut SimState<T>) -> Option<Arc<Replication<T>>> {
        if state.replication_state != ReplicationState::Initialized {
            return None;
        }
        state.replication_state = ReplicationState::Started;
        state.replication.clone()
    }

    fn announce_replication(&self, first: Option<Arc<Replication<T>>>) {
        if let Some(replication) = first {
            self.shared.view.metrics.replication_started();
            debug!(replication = %replication.id(), "replication started");
            self.shared.view.publish(
                SimulatorEvent::StartReplication,
                replication_payload(&replication),
            );
        }
    }

    /// Shared body of `start` and `run_up_to*`: move to `Starting` and
    /// hand the run to the worker.
    ///
    /// Called on the worker thread itself (an END_REPLICATION subscriber
    /// starting the next replication), this still only queues the go
    /// signal rather than running the loop inline. The worker picks it up
    /// once the current run has finished, so a long replication chain
    /// never nests run loops on one stack.
    fn launch(
        &self,
        operation: &'static str,
        until: Option<(SimTime<T>, bool)>,
    ) -> Result<(), StateError> {
        self.reject_if_running(operation)?;
        let _guard = self.acquire()?;
        let first = {
            let mut state = self.shared.view.state.write();
            Self::check_startable(operation, &state)?;
            if let Some((target, _)) = until {
                if target <= state.time {
                    return Err(StateError::RunUntilInPast);
                }
            }
            state.run_until = until;
            state.run_state = RunState::Starting;
            Self::begin_replication(&mut state)
        };
        self.shared.stop_requested.store(false, Ordering::Release);
        self.announce_replication(first);
        self.shared
            .view
            .publish(SimulatorEvent::Starting, Payload::None);

        if let Err(err) = self.shared.signal.send() {
            self.shared.view.state.write().run_state = RunState::Stopped;
            return Err(err);
        }
        let on_worker = self.shared.worker_thread.get() == Some(&thread::current().id());
        debug!(operation, on_worker, "go signal sent");
        Ok(())
    }
}

impl<T: Timeline, F: Formalism<T>> Drop for Simulator<T, F> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<T: Timeline, F: Formalism<T>> fmt::Debug for Simulator<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.view.state.read();
        f.debug_struct("Simulator")
            .field("time", &state.time)
            .field("run_state", &state.run_state)
            .field("replication_state", &state.replication_state)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepContext;
    use crate::treatment::RunControl;

    /// Fires one unit at each listed instant.
    struct Ticker {
        times: Vec<f64>,
        pos: usize,
        fail_at: Option<usize>,
    }

    impl Ticker {
        fn new() -> Self {
            Self {
                times: Vec::new(),
                pos: 0,
                fail_at: None,
            }
        }
    }

    impl Formalism<f64> for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }

        fn reset(&mut self, _start: SimTime<f64>) {
            self.times.clear();
            self.pos = 0;
        }

        fn next_time(&self) -> Option<SimTime<f64>> {
            self.times.get(self.pos).copied().map(SimTime::new)
        }

        fn step(&mut self, ctx: &mut StepContext<'_, f64>) -> Result<(), PropagationError> {
            let t = self.times[self.pos];
            self.pos += 1;
            ctx.set_time(SimTime::new(t))
                .map_err(|source| PropagationError::State {
                    hook: "ticker".into(),
                    source,
                })?;
            if self.fail_at == Some(self.pos - 1) {
                return Err(PropagationError::failed("ticker", "scheduled failure"));
            }
            Ok(())
        }
    }

    struct Schedule(Vec<f64>);

    impl Model<f64, Ticker> for Schedule {
        fn construct(
            &mut self,
            _ctx: &ModelContext<'_, f64>,
            formalism: &mut Ticker,
        ) -> Result<(), PropagationError> {
            formalism.times = self.0.clone();
            Ok(())
        }
    }

    struct Broken;

    impl Model<f64, Ticker> for Broken {
        fn construct(
            &mut self,
            _ctx: &ModelContext<'_, f64>,
            _formalism: &mut Ticker,
        ) -> Result<(), PropagationError> {
            Err(PropagationError::failed("broken", "cannot build"))
        }
    }

    fn replication() -> Replication<f64> {
        let rc = RunControl::new("rc", 0.0, 0.0, 10.0).unwrap();
        Replication::new("r0", rc).unwrap()
    }

    fn simulator() -> Simulator<f64, Ticker> {
        Simulator::new(Ticker::new(), SimulatorConfig::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SimulatorConfig {
            control_lock_timeout: Duration::ZERO,
            ..SimulatorConfig::default()
        };
        match Simulator::new(Ticker::new(), config) {
            Err(ConfigError::InvalidLockTimeout) => {}
            other => panic!("expected InvalidLockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn start_without_replication_fails() {
        let sim = simulator();
        match sim.start() {
            Err(StateError::NoReplication { .. }) => {}
            other => panic!("expected NoReplication, got {other:?}"),
        }
        assert_eq!(sim.run_state(), RunState::NotInitialized);
    }

    #[test]
    fn initialize_resets_time_and_states() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0, 2.0]))
            .unwrap();
        assert_eq!(sim.time(), SimTime::new(0.0));
        assert_eq!(sim.run_state(), RunState::Initialized);
        assert_eq!(sim.replication_state(), ReplicationState::Initialized);
        assert_eq!(sim.with_formalism(|f| f.times.len()).unwrap(), 2);
    }

    #[test]
    fn step_runs_one_unit_then_stops() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0, 4.0]))
            .unwrap();
        sim.step().unwrap();
        assert_eq!(sim.time(), SimTime::new(1.0));
        assert_eq!(sim.run_state(), RunState::Stopped);
        assert_eq!(sim.replication_state(), ReplicationState::Started);
        sim.step().unwrap();
        assert_eq!(sim.time(), SimTime::new(4.0));
        assert_eq!(sim.metrics().units_executed, 2);
    }

    #[test]
    fn step_past_last_unit_ends_replication() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0])).unwrap();
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.time(), SimTime::new(10.0));
        assert_eq!(sim.run_state(), RunState::Ended);
        assert_eq!(sim.replication_state(), ReplicationState::Ended);
        match sim.start() {
            Err(StateError::EndOfRun { .. }) => {}
            other => panic!("expected EndOfRun, got {other:?}"),
        }
    }

    #[test]
    fn start_runs_to_end_on_worker() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0, 2.0, 3.0]))
            .unwrap();
        sim.start().unwrap();
        assert!(sim.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(sim.run_state(), RunState::Ended);
        assert_eq!(sim.time(), SimTime::new(10.0));
        let m = sim.metrics();
        assert_eq!(m.units_executed, 3);
        assert_eq!(m.replications_started, 1);
        assert_eq!(m.replications_ended, 1);
        assert_eq!(m.forced_early_ends, 0);
    }

    #[test]
    fn run_up_to_pauses_before_target() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0, 5.0, 6.0]))
            .unwrap();
        sim.run_up_to(SimTime::new(5.0)).unwrap();
        assert!(sim.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(sim.run_state(), RunState::Stopped);
        assert_eq!(sim.time(), SimTime::new(5.0));
        assert_eq!(sim.metrics().units_executed, 1);

        sim.run_up_to_and_including(SimTime::new(6.0)).unwrap();
        assert!(sim.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(sim.time(), SimTime::new(6.0));
        assert_eq!(sim.metrics().units_executed, 3);
    }

    #[test]
    fn run_up_to_in_the_past_fails() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![3.0])).unwrap();
        sim.step().unwrap();
        assert_eq!(sim.run_up_to(SimTime::new(2.0)), Err(StateError::RunUntilInPast));
        assert_eq!(sim.run_up_to(SimTime::new(3.0)), Err(StateError::RunUntilInPast));
        assert_eq!(sim.run_state(), RunState::Stopped);
    }

    #[test]
    fn failing_step_stops_and_counts() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0, 2.0]))
            .unwrap();
        {
            let guard = sim.shared.semaphore.lock();
            guard.borrow_mut().fail_at = Some(0);
        }
        match sim.step() {
            Err(SimError::Propagation(PropagationError::HookFailed { .. })) => {}
            other => panic!("expected HookFailed, got {other:?}"),
        }
        assert_eq!(sim.run_state(), RunState::Stopped);
        let m = sim.metrics();
        assert_eq!(m.propagation_errors, 1);
        assert!(m.last_propagation_error.is_some());
    }

    #[test]
    fn failing_construct_unbinds_replication() {
        let sim = simulator();
        match sim.initialize(replication(), &mut Broken) {
            Err(SimError::Propagation(_)) => {}
            other => panic!("expected Propagation, got {other:?}"),
        }
        assert!(sim.replication().is_none());
        assert_eq!(sim.run_state(), RunState::NotInitialized);
    }

    #[test]
    fn stop_requires_a_run() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![])).unwrap();
        match sim.stop() {
            Err(StateError::InvalidRunState { state, .. }) => {
                assert_eq!(state, RunState::Initialized);
            }
            other => panic!("expected InvalidRunState, got {other:?}"),
        }
    }

    #[test]
    fn cleanup_is_idempotent_and_final() {
        let sim = simulator();
        sim.initialize(replication(), &mut Schedule(vec![1.0])).unwrap();
        sim.cleanup();
        sim.cleanup();
        assert!(sim.is_shut_down());
        assert_eq!(sim.start(), Err(StateError::ShutDown));
    }
}
