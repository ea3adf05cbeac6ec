//! Time-weighted statistic over a piecewise-constant value.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tempora_core::{EventBus, SimError, SimTime, StateError, Timeline, WeightedStats};
use tempora_engine::SimulatorHandle;

use crate::collector::{Accumulate, Collector, ObservationBus};

pub(crate) struct TimeWeighted<T: Timeline> {
    stats: WeightedStats,
    /// Current value and the instant it took effect.
    last: Option<(f64, SimTime<T>)>,
}

impl<T: Timeline> Default for TimeWeighted<T> {
    fn default() -> Self {
        Self {
            stats: WeightedStats::new(),
            last: None,
        }
    }
}

impl<T: Timeline> TimeWeighted<T> {
    fn settle(&mut self, now: SimTime<T>) {
        if let Some((value, since)) = self.last {
            let held = T::duration_as_f64(&now.diff(&since));
            self.stats.ingest(value, held);
        }
    }
}

impl<T: Timeline> Accumulate<T> for TimeWeighted<T> {
    fn observe(&mut self, value: f64, now: SimTime<T>) {
        // Time already weighted is never reopened.
        let now = match self.last {
            Some((_, since)) if now < since => since,
            _ => now,
        };
        self.settle(now);
        self.last = Some((value, now));
    }

    fn restart(&mut self, now: SimTime<T>) {
        self.stats.reset();
        // The level in force carries over; only its history is dropped.
        self.last = self.last.map(|(value, _)| (value, now));
    }

    fn close(&mut self, now: SimTime<T>) {
        self.settle(now);
        self.last = None;
    }

    fn count(&self) -> u64 {
        self.stats.count() + u64::from(self.last.is_some())
    }

    fn mean(&self) -> Option<f64> {
        self.stats.mean()
    }
}

/// Time-weighted mean, variance, minimum and maximum of a value that
/// holds between observations.
///
/// Each ingested value stays in force until the next one; its weight is
/// the simulated time it was held. WARMUP discards the history but keeps
/// the level in force, re-based to the warmup instant. END_REPLICATION
/// closes the last level at the end time and feeds the final mean to the
/// experiment's summary.
pub struct Persistent<T: Timeline> {
    collector: Arc<Collector<T, TimeWeighted<T>>>,
}

impl<T: Timeline> Persistent<T> {
    /// Bind a persistent statistic named `description` into the
    /// simulator's current replication.
    pub fn new(description: impl Into<String>, sim: &SimulatorHandle<T>) -> Result<Self, SimError> {
        Ok(Self {
            collector: Collector::bind(description, sim, TimeWeighted::default())?,
        })
    }

    /// Bind and set the initial level at the current time.
    pub fn with_initial(
        description: impl Into<String>,
        sim: &SimulatorHandle<T>,
        value: f64,
    ) -> Result<Self, SimError> {
        let persistent = Self::new(description, sim)?;
        persistent.ingest(value);
        Ok(persistent)
    }

    /// Change the level at the current simulated time.
    pub fn ingest(&self, value: f64) {
        self.collector.ingest(value);
    }

    /// Change the level at `time`.
    ///
    /// Fails with [`StateError::TimeReversal`] if `time` precedes the
    /// previous change (or the warmup instant the level was re-based to).
    pub fn ingest_at(&self, time: SimTime<T>, value: f64) -> Result<(), StateError> {
        let since = self.collector.acc.lock().last.map(|(_, since)| since);
        if since.is_some_and(|since| time < since) {
            return Err(StateError::TimeReversal);
        }
        self.collector.ingest_at(value, time);
        Ok(())
    }

    /// Follow every `kind` value published on `source` until the
    /// replication ends.
    pub fn listen<K>(&self, source: &Arc<EventBus<K, f64>>, kind: K)
    where
        K: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        self.collector.listen(source, kind, |v: &f64| Some(*v));
    }

    /// Like [`listen`](Self::listen), with a projection from the source's
    /// payload.
    pub fn listen_with<K, E, X>(&self, source: &Arc<EventBus<K, E>>, kind: K, extract: X)
    where
        K: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        E: 'static,
        X: Fn(&E) -> Option<f64> + Send + Sync + 'static,
    {
        self.collector.listen(source, kind, extract);
    }

    /// Name under which the statistic is bound and summarized.
    pub fn description(&self) -> &str {
        self.collector.description()
    }

    /// The level in force, `None` before the first observation and after
    /// the replication ends.
    pub fn current(&self) -> Option<f64> {
        self.collector.acc.lock().last.map(|(value, _)| value)
    }

    /// Weighted moments of the levels closed so far.
    pub fn stats(&self) -> WeightedStats {
        self.collector.acc.lock().stats.clone()
    }

    /// Time-weighted mean of the closed levels.
    pub fn mean(&self) -> Option<f64> {
        self.collector.acc.lock().stats.mean()
    }

    /// Time-weighted population variance.
    pub fn variance(&self) -> Option<f64> {
        self.collector.acc.lock().stats.variance()
    }

    /// Time-weighted population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        self.collector.acc.lock().stats.std_dev()
    }

    /// Lowest level held.
    pub fn min(&self) -> Option<f64> {
        self.collector.acc.lock().stats.min()
    }

    /// Highest level held.
    pub fn max(&self) -> Option<f64> {
        self.collector.acc.lock().stats.max()
    }

    /// Total simulated time covered by closed levels.
    pub fn total_time(&self) -> f64 {
        self.collector.acc.lock().stats.total_weight()
    }

    /// Whether END_REPLICATION has been handled.
    pub fn is_finished(&self) -> bool {
        self.collector.is_finished()
    }

    /// Level changes, republished as they are ingested.
    pub fn events(&self) -> &Arc<ObservationBus<T>> {
        self.collector.events()
    }

    /// The simulator this statistic is bound to.
    pub fn simulator(&self) -> &SimulatorHandle<T> {
        self.collector.simulator()
    }
}

impl<T: Timeline> Clone for Persistent<T> {
    fn clone(&self) -> Self {
        Self {
            collector: Arc::clone(&self.collector),
        }
    }
}

impl<T: Timeline> fmt::Debug for Persistent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let acc = self.collector.acc.lock();
        f.debug_struct("Persistent")
            .field("description", &self.collector.description())
            .field("current", &acc.last.map(|(value, _)| value))
            .field("mean", &acc.stats.mean())
            .finish()
    }
}
