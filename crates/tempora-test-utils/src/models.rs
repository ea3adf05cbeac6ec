//! Models that populate the fixture formalisms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tempora_core::{
    Notification, PropagationError, SimTime, SimulatorEvent, StateError, SubscriptionScope,
    Timeline,
};
use tempora_engine::{Formalism, Model, ModelContext, StepContext};

use crate::formalisms::EventListFormalism;

fn schedule_error(source: StateError) -> PropagationError {
    PropagationError::State {
        hook: "model.schedule".into(),
        source,
    }
}

/// Final value of one replication's counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationCount {
    pub replication: String,
    pub count: u64,
}

/// Shared record of per-replication final counts.
pub type Counts = Arc<Mutex<Vec<ReplicationCount>>>;

/// Subscribe a replication-scoped END_REPLICATION hook that appends the
/// counter's final value to `counts`.
fn report_at_end<T: Timeline>(ctx: &ModelContext<'_, T>, counter: Arc<AtomicU64>, counts: Counts) {
    let replication = ctx.replication().id().to_owned();
    ctx.events().subscribe_scoped(
        SimulatorEvent::EndReplication,
        SubscriptionScope::Replication,
        move |_: &Notification<T>| {
            counts.lock().push(ReplicationCount {
                replication: replication.clone(),
                count: counter.load(Ordering::SeqCst),
            });
        },
    );
}

// ── Counting ───────────────────────────────────────────────────────

/// Schedules a unit every `interval` from the replication start and counts
/// the units that run.
pub struct CountingModel<T: Timeline> {
    interval: T::Duration,
    counts: Counts,
}

impl<T: Timeline> CountingModel<T> {
    pub fn new(interval: T::Duration) -> Self {
        Self {
            interval,
            counts: Arc::default(),
        }
    }

    /// Handle to the per-replication counts, filled at END_REPLICATION.
    pub fn counts(&self) -> Counts {
        Arc::clone(&self.counts)
    }
}

fn tick<T: Timeline>(
    counter: Arc<AtomicU64>,
    interval: T::Duration,
) -> impl FnOnce(&mut StepContext<'_, T>, &mut EventListFormalism<T>) -> Result<(), PropagationError>
       + Send
       + 'static {
    move |ctx, formalism| {
        counter.fetch_add(1, Ordering::SeqCst);
        let next = ctx.time().plus(interval);
        formalism
            .schedule(next, tick(counter, interval))
            .map_err(schedule_error)
    }
}

impl<T: Timeline> Model<T, EventListFormalism<T>> for CountingModel<T> {
    fn construct(
        &mut self,
        ctx: &ModelContext<'_, T>,
        formalism: &mut EventListFormalism<T>,
    ) -> Result<(), PropagationError> {
        let counter = Arc::new(AtomicU64::new(0));
        report_at_end(ctx, Arc::clone(&counter), Arc::clone(&self.counts));
        formalism
            .schedule(ctx.time(), tick(counter, self.interval))
            .map_err(schedule_error)
    }
}

// ── Random arrivals ────────────────────────────────────────────────

/// Poisson arrivals with exponential inter-arrival times drawn from the
/// replication's `"arrivals"` stream.
pub struct RandomArrivalsModel {
    mean_interarrival: f64,
    counts: Counts,
}

impl RandomArrivalsModel {
    pub fn new(mean_interarrival: f64) -> Self {
        Self {
            mean_interarrival,
            counts: Arc::default(),
        }
    }

    pub fn counts(&self) -> Counts {
        Arc::clone(&self.counts)
    }
}

fn arrival<R: Rng + Send + 'static>(
    counter: Arc<AtomicU64>,
    mut rng: R,
    mean: f64,
) -> impl FnOnce(&mut StepContext<'_, f64>, &mut EventListFormalism<f64>) -> Result<(), PropagationError>
       + Send
       + 'static {
    move |ctx, formalism| {
        counter.fetch_add(1, Ordering::SeqCst);
        let u: f64 = rng.random();
        let gap = -mean * (1.0 - u).ln();
        let next = ctx.time().plus(gap);
        formalism
            .schedule(next, arrival(counter, rng, mean))
            .map_err(schedule_error)
    }
}

impl Model<f64, EventListFormalism<f64>> for RandomArrivalsModel {
    fn construct(
        &mut self,
        ctx: &ModelContext<'_, f64>,
        formalism: &mut EventListFormalism<f64>,
    ) -> Result<(), PropagationError> {
        let counter = Arc::new(AtomicU64::new(0));
        report_at_end(ctx, Arc::clone(&counter), Arc::clone(&self.counts));
        let rng = ctx.replication().stream("arrivals");
        let first: SimTime<f64> = ctx.time();
        formalism
            .schedule(first, arrival(counter, rng, self.mean_interarrival))
            .map_err(schedule_error)
    }
}

// ── Scripted ───────────────────────────────────────────────────────

type Script<T> = Box<
    dyn FnMut(&ModelContext<'_, T>, &mut EventListFormalism<T>) -> Result<(), PropagationError>
        + Send,
>;

/// A model whose construction is an arbitrary closure, re-run for every
/// replication.
pub struct ScriptedModel<T: Timeline> {
    script: Script<T>,
}

impl<T: Timeline> ScriptedModel<T> {
    pub fn new<C>(script: C) -> Self
    where
        C: FnMut(&ModelContext<'_, T>, &mut EventListFormalism<T>) -> Result<(), PropagationError>
            + Send
            + 'static,
    {
        Self {
            script: Box::new(script),
        }
    }
}

impl<T: Timeline> Model<T, EventListFormalism<T>> for ScriptedModel<T> {
    fn construct(
        &mut self,
        ctx: &ModelContext<'_, T>,
        formalism: &mut EventListFormalism<T>,
    ) -> Result<(), PropagationError> {
        (self.script)(ctx, formalism)
    }
}

// ── Failing ────────────────────────────────────────────────────────

/// Fails (or panics) during construction.
pub struct FailingModel {
    pub panic: bool,
}

impl<T: Timeline, F: Formalism<T>> Model<T, F> for FailingModel {
    fn construct(
        &mut self,
        _ctx: &ModelContext<'_, T>,
        _formalism: &mut F,
    ) -> Result<(), PropagationError> {
        if self.panic {
            panic!("model construction panicked");
        }
        Err(PropagationError::failed("failing-model", "construction refused"))
    }
}
