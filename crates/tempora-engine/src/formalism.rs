//! Extension points: the [`Formalism`] that decides what happens next and
//! the [`Model`] that populates it for each replication.

use tempora_core::{PropagationError, SimTime, Timeline};

use crate::context::{ModelContext, StepContext};

/// A simulation formalism: discrete-event list, fixed-step integrator,
/// or anything else that can name its next atomic unit and execute it.
///
/// The simulator owns the replication boundaries. Before each unit it
/// asks for [`next_time`](Formalism::next_time) and, depending on the
/// answer, fires WARMUP, pauses at a `run_up_to` target, ends the
/// replication, or calls [`step`](Formalism::step).
///
/// `step` runs with the simulator lock held. It is expected to move time
/// to the unit's instant through [`StepContext::set_time`] (which
/// publishes TIME_CHANGED) before acting.
pub trait Formalism<T: Timeline>: Send + 'static {
    /// Human-readable name, used in logs and errors.
    fn name(&self) -> &str;

    /// Discard all pending work and restart at `start`.
    ///
    /// Called by `initialize` before the model is constructed.
    fn reset(&mut self, start: SimTime<T>);

    /// Instant of the next unit, `None` when nothing is pending.
    fn next_time(&self) -> Option<SimTime<T>>;

    /// Execute exactly one unit.
    fn step(&mut self, ctx: &mut StepContext<'_, T>) -> Result<(), PropagationError>;
}

/// Builds a model into a formalism at the start of every replication.
pub trait Model<T: Timeline, F: Formalism<T>>: Send + 'static {
    /// Schedule initial work and bind statistics for the replication in
    /// `ctx`.
    fn construct(
        &mut self,
        ctx: &ModelContext<'_, T>,
        formalism: &mut F,
    ) -> Result<(), PropagationError>;
}
