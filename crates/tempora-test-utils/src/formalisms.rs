//! Minimal formalisms for driving a simulator in tests.
//!
//! - [`EventListFormalism`]: a discrete-event list ordered by time,
//!   priority and insertion order.
//! - [`FixedStepFormalism`]: advances by a constant increment and calls
//!   its hooks once per step.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tempora_core::{PropagationError, SimTime, StateError, Timeline};
use tempora_engine::{Formalism, StepContext};

fn state_error(hook: &str, source: StateError) -> PropagationError {
    PropagationError::State {
        hook: hook.to_owned(),
        source,
    }
}

// ── Event list ─────────────────────────────────────────────────────

/// Work executed when a scheduled event comes due.
///
/// The action receives the formalism itself so it can schedule
/// follow-up events.
pub type Action<T> = Box<
    dyn FnOnce(&mut StepContext<'_, T>, &mut EventListFormalism<T>) -> Result<(), PropagationError>
        + Send,
>;

struct Scheduled<T: Timeline> {
    time: SimTime<T>,
    priority: i32,
    seq: u64,
    action: Action<T>,
}

impl<T: Timeline> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Timeline> Eq for Scheduled<T> {}

impl<T: Timeline> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Timeline> Ord for Scheduled<T> {
    // Reversed: BinaryHeap is a max-heap and the earliest event must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Discrete-event list. Lower priority values run first among events
/// scheduled for the same instant; ties keep scheduling order.
pub struct EventListFormalism<T: Timeline> {
    queue: BinaryHeap<Scheduled<T>>,
    now: SimTime<T>,
    next_seq: u64,
    executed: u64,
}

impl<T: Timeline> EventListFormalism<T> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            now: SimTime::zero(),
            next_seq: 0,
            executed: 0,
        }
    }

    /// Schedule `action` at `time` with priority 0.
    pub fn schedule<A>(&mut self, time: SimTime<T>, action: A) -> Result<(), StateError>
    where
        A: FnOnce(&mut StepContext<'_, T>, &mut EventListFormalism<T>) -> Result<(), PropagationError>
            + Send
            + 'static,
    {
        self.schedule_with_priority(time, 0, action)
    }

    /// Schedule `action` at `time`. Fails if `time` is in the past.
    pub fn schedule_with_priority<A>(
        &mut self,
        time: SimTime<T>,
        priority: i32,
        action: A,
    ) -> Result<(), StateError>
    where
        A: FnOnce(&mut StepContext<'_, T>, &mut EventListFormalism<T>) -> Result<(), PropagationError>
            + Send
            + 'static,
    {
        if time < self.now {
            return Err(StateError::TimeReversal);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            time,
            priority,
            seq,
            action: Box::new(action),
        });
        Ok(())
    }

    /// Time of the last executed event (or the start time).
    pub fn now(&self) -> SimTime<T> {
        self.now
    }

    /// Pending events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events executed since the last reset.
    pub fn executed(&self) -> u64 {
        self.executed
    }
}

impl<T: Timeline> Default for EventListFormalism<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Timeline> Formalism<T> for EventListFormalism<T> {
    fn name(&self) -> &str {
        "event-list"
    }

    fn reset(&mut self, start: SimTime<T>) {
        self.queue.clear();
        self.now = start;
        self.next_seq = 0;
        self.executed = 0;
    }

    fn next_time(&self) -> Option<SimTime<T>> {
        self.queue.peek().map(|s| s.time)
    }

    fn step(&mut self, ctx: &mut StepContext<'_, T>) -> Result<(), PropagationError> {
        let Some(event) = self.queue.pop() else {
            return Ok(());
        };
        ctx.set_time(event.time)
            .map_err(|e| state_error("event-list", e))?;
        self.now = event.time;
        self.executed += 1;
        (event.action)(ctx, self)
    }
}

// ── Fixed step ─────────────────────────────────────────────────────

/// Hook called once per fixed step, after time has moved.
pub type StepHook<T> =
    Box<dyn FnMut(&mut StepContext<'_, T>) -> Result<(), PropagationError> + Send>;

/// Time-stepped formalism: units at `start + dt`, `start + 2 dt`, ...
pub struct FixedStepFormalism<T: Timeline> {
    dt: T::Duration,
    next: SimTime<T>,
    hooks: Vec<StepHook<T>>,
    steps: u64,
}

impl<T: Timeline> FixedStepFormalism<T> {
    pub fn new(dt: T::Duration) -> Self {
        Self {
            dt,
            next: SimTime::zero().plus(dt),
            hooks: Vec::new(),
            steps: 0,
        }
    }

    /// Register a per-step hook. Hooks are dropped on reset.
    pub fn add_hook<H>(&mut self, hook: H)
    where
        H: FnMut(&mut StepContext<'_, T>) -> Result<(), PropagationError> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Steps taken since the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl<T: Timeline> Formalism<T> for FixedStepFormalism<T> {
    fn name(&self) -> &str {
        "fixed-step"
    }

    fn reset(&mut self, start: SimTime<T>) {
        self.next = start.plus(self.dt);
        self.hooks.clear();
        self.steps = 0;
    }

    fn next_time(&self) -> Option<SimTime<T>> {
        Some(self.next)
    }

    fn step(&mut self, ctx: &mut StepContext<'_, T>) -> Result<(), PropagationError> {
        ctx.set_time(self.next)
            .map_err(|e| state_error("fixed-step", e))?;
        self.next = self.next.plus(self.dt);
        self.steps += 1;
        for hook in &mut self.hooks {
            hook(ctx)?;
        }
        Ok(())
    }
}
