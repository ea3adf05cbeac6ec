//! Lifecycle plumbing shared by [`Tally`](crate::Tally) and
//! [`Persistent`](crate::Persistent).
//!
//! A collector binds into its replication's statistics namespace, listens
//! for WARMUP (unless it is bound after the warmup instant) and
//! END_REPLICATION with replication-scoped subscriptions, and detaches
//! from its value sources when the replication ends.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tempora_core::{
    EventBus, Notification, SimError, SimTime, SimulatorEvent, StateError, SubscriptionId,
    SubscriptionScope, Timeline,
};
use tempora_engine::{ExperimentContext, SimulatorHandle, Statistic};
use tracing::debug;

// ── Observation events ─────────────────────────────────────────────

/// Notifications published by a statistic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatisticEvent {
    /// A value was ingested.
    Observed,
}

/// Payload of [`StatisticEvent::Observed`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation<T: Timeline> {
    /// The ingested value.
    pub value: f64,
    /// Simulated time of ingestion.
    pub time: SimTime<T>,
}

/// Registry a statistic publishes its observations on.
pub type ObservationBus<T> = EventBus<StatisticEvent, Observation<T>>;

// ── Accumulation strategy ──────────────────────────────────────────

pub(crate) trait Accumulate<T: Timeline>: Send + 'static {
    fn observe(&mut self, value: f64, now: SimTime<T>);
    /// Discard what was collected; called at WARMUP or on late binding.
    fn restart(&mut self, now: SimTime<T>);
    /// Finalize at the end of the replication.
    fn close(&mut self, now: SimTime<T>);
    fn count(&self) -> u64;
    fn mean(&self) -> Option<f64>;
}

type Detach = Box<dyn FnOnce() + Send>;

// ── Collector ──────────────────────────────────────────────────────

pub(crate) struct Collector<T: Timeline, A> {
    description: String,
    sim: SimulatorHandle<T>,
    replication: String,
    experiment: Option<ExperimentContext>,
    pub(crate) acc: Mutex<A>,
    events: Arc<ObservationBus<T>>,
    warmup_sub: Mutex<Option<SubscriptionId>>,
    end_sub: Mutex<Option<SubscriptionId>>,
    sources: Mutex<Vec<Detach>>,
    finished: AtomicBool,
}

impl<T: Timeline, A: Accumulate<T>> Collector<T, A> {
    pub(crate) fn bind(
        description: impl Into<String>,
        sim: &SimulatorHandle<T>,
        acc: A,
    ) -> Result<Arc<Self>, SimError> {
        let description = description.into();
        let replication = sim.replication().ok_or(StateError::NoReplication {
            operation: "bind statistic",
        })?;
        let collector = Arc::new(Self {
            description,
            sim: sim.clone(),
            replication: replication.id().to_owned(),
            experiment: replication.experiment().cloned(),
            acc: Mutex::new(acc),
            events: Arc::new(EventBus::new()),
            warmup_sub: Mutex::new(None),
            end_sub: Mutex::new(None),
            sources: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        });
        replication
            .statistics()
            .bind(Arc::clone(&collector) as Arc<dyn Statistic>)?;

        let treatment = replication.treatment();
        let late = !treatment.has_warmup()
            || sim.warmup_fired()
            || sim.time() > treatment.warmup_time();
        if late {
            collector.acc.lock().restart(sim.time());
        } else {
            let weak = Arc::downgrade(&collector);
            let id = sim.events().subscribe_scoped(
                SimulatorEvent::Warmup,
                SubscriptionScope::Replication,
                move |n: &Notification<T>| {
                    if let Some(c) = weak.upgrade() {
                        c.on_warmup(n.time);
                    }
                },
            );
            *collector.warmup_sub.lock() = Some(id);
        }

        let weak = Arc::downgrade(&collector);
        let id = sim.events().subscribe_scoped(
            SimulatorEvent::EndReplication,
            SubscriptionScope::Replication,
            move |n: &Notification<T>| {
                if let Some(c) = weak.upgrade() {
                    c.on_end(n.time);
                }
            },
        );
        *collector.end_sub.lock() = Some(id);

        debug!(
            statistic = %collector.description,
            replication = %replication.id(),
            late,
            "statistic bound"
        );
        Ok(collector)
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn events(&self) -> &Arc<ObservationBus<T>> {
        &self.events
    }

    pub(crate) fn simulator(&self) -> &SimulatorHandle<T> {
        &self.sim
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn ingest(&self, value: f64) {
        self.ingest_at(value, self.sim.time());
    }

    pub(crate) fn ingest_at(&self, value: f64, now: SimTime<T>) {
        if self.is_finished() {
            debug!(statistic = %self.description, value, "observation after end of replication ignored");
            return;
        }
        self.acc.lock().observe(value, now);
        self.events
            .publish(StatisticEvent::Observed, &Observation { value, time: now });
    }

    /// Feed values extracted from `kind` notifications on `source` until
    /// the replication ends.
    pub(crate) fn listen<K, E, X>(self: &Arc<Self>, source: &Arc<EventBus<K, E>>, kind: K, extract: X)
    where
        K: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        E: 'static,
        X: Fn(&E) -> Option<f64> + Send + Sync + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = source.subscribe(kind, move |e: &E| {
            let Some(c) = weak.upgrade() else { return };
            if let Some(value) = extract(e) {
                c.ingest(value);
            }
        });
        let bus = Arc::downgrade(source);
        self.sources.lock().push(Box::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.unsubscribe(id);
            }
        }));
    }

    fn on_warmup(&self, now: SimTime<T>) {
        self.acc.lock().restart(now);
        if let Some(id) = self.warmup_sub.lock().take() {
            self.sim.events().unsubscribe(id);
        }
        debug!(statistic = %self.description, time = ?now, "statistic restarted at warmup");
    }

    fn on_end(&self, now: SimTime<T>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.end_sub.lock().take() {
            self.sim.events().unsubscribe(id);
        }
        for detach in self.sources.lock().drain(..) {
            detach();
        }

        let mean = {
            let mut acc = self.acc.lock();
            acc.close(now);
            acc.mean()
        };
        let Some(experiment) = &self.experiment else {
            return;
        };
        match mean {
            Some(mean) => {
                experiment.summaries().record(&self.description, mean);
                debug!(
                    statistic = %self.description,
                    replication = %self.replication,
                    mean,
                    "replication summary recorded"
                );
            }
            None => debug!(
                statistic = %self.description,
                replication = %self.replication,
                "no observations; nothing recorded"
            ),
        }
    }
}

impl<T: Timeline, A: Accumulate<T>> Statistic for Collector<T, A> {
    fn description(&self) -> &str {
        &self.description
    }

    fn count(&self) -> u64 {
        self.acc.lock().count()
    }

    fn mean(&self) -> Option<f64> {
        self.acc.lock().mean()
    }
}
