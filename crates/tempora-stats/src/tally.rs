//! Unweighted statistic over discrete observations.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tempora_core::{EventBus, RunningStats, SimError, SimTime, Timeline};
use tempora_engine::SimulatorHandle;

use crate::collector::{Accumulate, Collector, ObservationBus};

#[derive(Default)]
pub(crate) struct TallyAcc(RunningStats);

impl<T: Timeline> Accumulate<T> for TallyAcc {
    fn observe(&mut self, value: f64, _now: SimTime<T>) {
        self.0.ingest(value);
    }

    fn restart(&mut self, _now: SimTime<T>) {
        self.0.reset();
    }

    fn close(&mut self, _now: SimTime<T>) {}

    fn count(&self) -> u64 {
        self.0.count()
    }

    fn mean(&self) -> Option<f64> {
        self.0.mean()
    }
}

/// Running count, mean, variance, minimum and maximum of the values it
/// ingests during one replication.
///
/// Observations made before WARMUP are discarded when it fires. At
/// END_REPLICATION the final mean is fed to the experiment's summary for
/// this tally's description.
pub struct Tally<T: Timeline> {
    collector: Arc<Collector<T, TallyAcc>>,
}

impl<T: Timeline> Tally<T> {
    /// Bind a tally named `description` into the simulator's current
    /// replication.
    ///
    /// Fails if no replication is bound or the description is already
    /// taken in it.
    pub fn new(description: impl Into<String>, sim: &SimulatorHandle<T>) -> Result<Self, SimError> {
        Ok(Self {
            collector: Collector::bind(description, sim, TallyAcc::default())?,
        })
    }

    /// Record one observation at the current simulated time.
    pub fn ingest(&self, value: f64) {
        self.collector.ingest(value);
    }

    /// Ingest every `kind` value published on `source` until the
    /// replication ends.
    pub fn listen<K>(&self, source: &Arc<EventBus<K, f64>>, kind: K)
    where
        K: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        self.collector.listen(source, kind, |v: &f64| Some(*v));
    }

    /// Like [`listen`](Self::listen), with a projection from the source's
    /// payload. Payloads mapped to `None` are skipped.
    pub fn listen_with<K, E, X>(&self, source: &Arc<EventBus<K, E>>, kind: K, extract: X)
    where
        K: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        E: 'static,
        X: Fn(&E) -> Option<f64> + Send + Sync + 'static,
    {
        self.collector.listen(source, kind, extract);
    }

    /// Name under which the tally is bound and summarized.
    pub fn description(&self) -> &str {
        self.collector.description()
    }

    /// Copy of the running moments.
    pub fn stats(&self) -> RunningStats {
        self.collector.acc.lock().0.clone()
    }

    /// Observations since the last restart.
    pub fn count(&self) -> u64 {
        self.collector.acc.lock().0.count()
    }

    /// Mean of the observations, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        self.collector.acc.lock().0.mean()
    }

    /// Sample variance.
    pub fn variance(&self) -> Option<f64> {
        self.collector.acc.lock().0.variance()
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        self.collector.acc.lock().0.std_dev()
    }

    /// Smallest observation.
    pub fn min(&self) -> Option<f64> {
        self.collector.acc.lock().0.min()
    }

    /// Largest observation.
    pub fn max(&self) -> Option<f64> {
        self.collector.acc.lock().0.max()
    }

    /// Whether END_REPLICATION has been handled.
    pub fn is_finished(&self) -> bool {
        self.collector.is_finished()
    }

    /// Observations this tally republishes as it ingests them.
    pub fn events(&self) -> &Arc<ObservationBus<T>> {
        self.collector.events()
    }

    /// The simulator this tally is bound to.
    pub fn simulator(&self) -> &SimulatorHandle<T> {
        self.collector.simulator()
    }
}

impl<T: Timeline> Clone for Tally<T> {
    fn clone(&self) -> Self {
        Self {
            collector: Arc::clone(&self.collector),
        }
    }
}

impl<T: Timeline> fmt::Debug for Tally<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let acc = self.collector.acc.lock();
        f.debug_struct("Tally")
            .field("description", &self.collector.description())
            .field("count", &acc.0.count())
            .field("mean", &acc.0.mean())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempora_core::{SimulatorEvent, StateError};
    use tempora_engine::{Replication, RunControl};
    use tempora_test_utils::{event_list_simulator, ScriptedModel, WAIT};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Queue {
        Wait,
    }

    fn treatment() -> RunControl<f64> {
        RunControl::new("rc", 0.0, 5.0, 10.0).unwrap()
    }

    #[test]
    fn binding_requires_a_replication() {
        let sim = event_list_simulator();
        match Tally::new("wait", &sim.handle()) {
            Err(SimError::State(StateError::NoReplication { .. })) => {}
            other => panic!("expected NoReplication, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn duplicate_description_rejected() {
        let sim = event_list_simulator();
        let slot = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let captured = Arc::clone(&slot);
        let mut model = ScriptedModel::<f64>::new(move |ctx, _| {
            captured.lock().push(Tally::new("wait", ctx.simulator()).map(|_| ()));
            captured.lock().push(Tally::new("wait", ctx.simulator()).map(|_| ()));
            Ok(())
        });
        sim.initialize(Replication::new("r", treatment()).unwrap(), &mut model)
            .unwrap();
        let results = slot.lock();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(SimError::Config(tempora_core::ConfigError::DuplicateStatistic {
                description, ..
            })) => assert_eq!(description, "wait"),
            other => panic!("expected DuplicateStatistic, got {other:?}"),
        }
    }

    #[test]
    fn warmup_discards_earlier_observations() {
        let sim = event_list_simulator();
        let slot: Arc<parking_lot::Mutex<Option<Tally<f64>>>> = Arc::default();
        let captured = Arc::clone(&slot);
        let mut model = ScriptedModel::<f64>::new(move |ctx, events| {
            let tally = Tally::new("wait", ctx.simulator())
                .map_err(|e| tempora_core::PropagationError::failed("tally", e.to_string()))?;
            for (t, v) in [(1.0, 100.0), (6.0, 2.0), (7.0, 4.0)] {
                let tally = tally.clone();
                events
                    .schedule(SimTime::new(t), move |_, _| {
                        tally.ingest(v);
                        Ok(())
                    })
                    .map_err(|e| tempora_core::PropagationError::failed("schedule", e.to_string()))?;
            }
            *captured.lock() = Some(tally);
            Ok(())
        });
        sim.initialize(Replication::new("r", treatment()).unwrap(), &mut model)
            .unwrap();

        sim.run_up_to(SimTime::new(5.0)).unwrap();
        assert!(sim.wait_until_idle(WAIT));
        let tally = slot.lock().clone().unwrap();
        assert_eq!(tally.count(), 1);
        assert_eq!(tally.mean(), Some(100.0));

        sim.start().unwrap();
        assert!(sim.wait_until_idle(WAIT));
        assert_eq!(tally.count(), 2);
        assert_eq!(tally.mean(), Some(3.0));
        assert_eq!(tally.min(), Some(2.0));
        assert_eq!(tally.max(), Some(4.0));
        assert!(tally.is_finished());
        assert_eq!(sim.events().subscriber_count(SimulatorEvent::Warmup), 0);
    }

    #[test]
    fn bound_after_warmup_collects_immediately() {
        let sim = event_list_simulator();
        let mut model = ScriptedModel::<f64>::new(|_, _| Ok(()));
        sim.initialize(Replication::new("r", treatment()).unwrap(), &mut model)
            .unwrap();
        sim.run_up_to(SimTime::new(7.0)).unwrap();
        assert!(sim.wait_until_idle(WAIT));
        assert!(sim.handle().warmup_fired());

        let handle = sim.handle();
        let tally = Tally::new("late", &handle).unwrap();
        let level = crate::Persistent::with_initial("level", &handle, 2.0).unwrap();
        assert_eq!(sim.events().subscriber_count(SimulatorEvent::Warmup), 0);
        tally.ingest(4.0);
        assert_eq!(tally.count(), 1);

        sim.start().unwrap();
        assert!(sim.wait_until_idle(WAIT));
        assert!(tally.is_finished());
        assert_eq!(tally.count(), 1);
        assert_eq!(tally.mean(), Some(4.0));
        // Held from 7 to the end at 10.
        assert_eq!(level.total_time(), 3.0);
        assert_eq!(level.mean(), Some(2.0));
    }

    #[test]
    fn listens_to_a_source_until_the_replication_ends() {
        let sim = event_list_simulator();
        let source: Arc<EventBus<Queue, f64>> = Arc::new(EventBus::new());
        let slot: Arc<parking_lot::Mutex<Option<Tally<f64>>>> = Arc::default();
        let captured = Arc::clone(&slot);
        let bus = Arc::clone(&source);
        let mut model = ScriptedModel::<f64>::new(move |ctx, _| {
            let tally = Tally::new("wait", ctx.simulator())
                .map_err(|e| tempora_core::PropagationError::failed("tally", e.to_string()))?;
            tally.listen(&bus, Queue::Wait);
            *captured.lock() = Some(tally);
            Ok(())
        });
        let rc = RunControl::new("rc", 0.0, 0.0, 10.0).unwrap();
        sim.initialize(Replication::new("r", rc).unwrap(), &mut model)
            .unwrap();
        let tally = slot.lock().clone().unwrap();

        assert_eq!(source.publish(Queue::Wait, &1.5), 1);
        source.publish(Queue::Wait, &2.5);
        assert_eq!(tally.count(), 2);
        assert_eq!(tally.mean(), Some(2.0));

        sim.start().unwrap();
        assert!(sim.wait_until_idle(WAIT));
        assert_eq!(source.subscriber_count(Queue::Wait), 0);
        source.publish(Queue::Wait, &100.0);
        assert_eq!(tally.count(), 2);
    }
}
