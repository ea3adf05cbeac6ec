//! Test utilities for Tempora development.
//!
//! Provides fixture formalisms ([`EventListFormalism`],
//! [`FixedStepFormalism`]), models that count what they execute, and a
//! [`NotificationRecorder`] that captures lifecycle notifications in order.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod formalisms;
pub mod models;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempora_core::{
    LifecycleBus, Notification, Payload, SimTime, SimulatorEvent, SubscriptionId, Timeline,
};
use tempora_engine::{RunControl, Simulator, SimulatorConfig};

pub use formalisms::{Action, EventListFormalism, FixedStepFormalism, StepHook};
pub use models::{
    CountingModel, Counts, FailingModel, RandomArrivalsModel, ReplicationCount, ScriptedModel,
};

/// Generous bound for waits on the worker thread in tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// `start = 10`, `warmup = 1`, `run = 12`: warmup at 11, end at 22.
pub fn reference_treatment() -> RunControl<f64> {
    match RunControl::new("reference", 10.0, 1.0, 12.0) {
        Ok(rc) => rc,
        Err(e) => panic!("reference treatment rejected: {e}"),
    }
}

/// A simulator over an empty event list with the default configuration.
pub fn event_list_simulator() -> Simulator<f64, EventListFormalism<f64>> {
    match Simulator::new(EventListFormalism::new(), SimulatorConfig::default()) {
        Ok(sim) => sim,
        Err(e) => panic!("simulator construction failed: {e}"),
    }
}

// ── Recorder ───────────────────────────────────────────────────────

/// One captured notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded<T: Timeline> {
    pub kind: SimulatorEvent,
    pub time: SimTime<T>,
    pub payload: Payload,
    pub thread: Option<String>,
}

/// Captures every lifecycle notification published on a bus.
pub struct NotificationRecorder<T: Timeline> {
    log: Arc<Mutex<Vec<Recorded<T>>>>,
    ids: Vec<SubscriptionId>,
}

impl<T: Timeline> NotificationRecorder<T> {
    /// Subscribe to every kind in `SimulatorEvent::ALL`.
    pub fn attach(bus: &LifecycleBus<T>) -> Self {
        Self::attach_to(bus, &SimulatorEvent::ALL)
    }

    /// Subscribe to `kinds` only.
    pub fn attach_to(bus: &LifecycleBus<T>, kinds: &[SimulatorEvent]) -> Self {
        let log: Arc<Mutex<Vec<Recorded<T>>>> = Arc::default();
        let ids = kinds
            .iter()
            .map(|&kind| {
                let log = Arc::clone(&log);
                bus.subscribe(kind, move |n: &Notification<T>| {
                    log.lock().push(Recorded {
                        kind: n.kind,
                        time: n.time,
                        payload: n.payload.clone(),
                        thread: std::thread::current().name().map(str::to_owned),
                    });
                })
            })
            .collect();
        Self { log, ids }
    }

    /// Everything captured so far.
    pub fn records(&self) -> Vec<Recorded<T>> {
        self.log.lock().clone()
    }

    /// Captured kinds, in order.
    pub fn kinds(&self) -> Vec<SimulatorEvent> {
        self.log.lock().iter().map(|r| r.kind).collect()
    }

    /// Captured kinds without TIME_CHANGED.
    pub fn lifecycle(&self) -> Vec<SimulatorEvent> {
        self.kinds()
            .into_iter()
            .filter(|k| *k != SimulatorEvent::TimeChanged)
            .collect()
    }

    /// Times at which `kind` was published.
    pub fn times_of(&self, kind: SimulatorEvent) -> Vec<SimTime<T>> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.time)
            .collect()
    }

    /// How often `kind` was published.
    pub fn count(&self, kind: SimulatorEvent) -> usize {
        self.log.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// Unsubscribe from `bus`.
    pub fn detach(self, bus: &LifecycleBus<T>) {
        for id in self.ids {
            bus.unsubscribe(id);
        }
    }
}
