//! Sequential replications of one model on one simulator.
//!
//! An [`Experiment`] listens for the simulator's END_REPLICATION and
//! launches the next replication once that notification has reached every
//! subscriber, still on the worker thread and under the simulator lock.
//! The lock is re-entrant and the go signal is queued without blocking, so
//! the chain needs no supervising thread.
//!
//! Statistics bound at any point of a replication, including from inside
//! a unit, therefore record their summaries before the next replication
//! starts and before [`Experiment::wait_until_ended`] returns.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use tempora_core::{
    ConfigError, EventBus, Notification, Payload, SimError, SimulatorEvent, StateError,
    SubscriptionId, SubscriptionScope, SummaryStatistic, Timeline,
};
use tracing::{debug, error, info};

use crate::config::ExperimentConfig;
use crate::formalism::{Formalism, Model};
use crate::replication::{ExperimentContext, Replication};
use crate::simulator::Simulator;
use crate::summary::SummaryRegistry;

// ── Events ─────────────────────────────────────────────────────────

/// Progress notifications published by an experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExperimentEvent {
    /// `start()` launched the first replication.
    StartExperiment,
    /// A replication was initialized and started.
    StartReplication,
    /// A replication completed.
    EndReplication,
    /// The last replication completed.
    EndExperiment,
}

/// Payload of an [`ExperimentEvent`].
#[derive(Clone, Debug)]
pub struct ExperimentNotification {
    /// What happened.
    pub kind: ExperimentEvent,
    /// Experiment identifier.
    pub experiment: Arc<str>,
    /// Replication index, for replication events.
    pub index: Option<usize>,
    /// Replication identifier, for replication events.
    pub replication: Option<Arc<str>>,
}

// ── Experiment ─────────────────────────────────────────────────────

#[derive(Default)]
struct Progress {
    /// Index of the replication in progress; `None` before the first.
    index: Option<usize>,
    current: Option<Arc<str>>,
    completed: Vec<Arc<str>>,
    running: bool,
    ended: bool,
}

struct ExperimentInner<T: Timeline, F: Formalism<T>> {
    this: Weak<Self>,
    id: Arc<str>,
    config: ExperimentConfig<T>,
    simulator: Arc<Simulator<T, F>>,
    model: Mutex<Box<dyn Model<T, F>>>,
    progress: Mutex<Progress>,
    ended: Condvar,
    summaries: Arc<SummaryRegistry>,
    events: EventBus<ExperimentEvent, ExperimentNotification>,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Runs `replications` replications of a model back to back and
/// aggregates the statistics they report.
pub struct Experiment<T: Timeline, F: Formalism<T>> {
    inner: Arc<ExperimentInner<T, F>>,
}

impl<T: Timeline, F: Formalism<T>> Experiment<T, F> {
    /// Validate `config` and attach to `simulator`.
    pub fn new(
        config: ExperimentConfig<T>,
        simulator: Arc<Simulator<T, F>>,
        model: impl Model<T, F>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = Arc::new_cyclic(|this| ExperimentInner {
            this: this.clone(),
            id: Arc::from(config.id.as_str()),
            config,
            simulator,
            model: Mutex::new(Box::new(model)),
            progress: Mutex::new(Progress::default()),
            ended: Condvar::new(),
            summaries: Arc::new(SummaryRegistry::new()),
            events: EventBus::new(),
            subscription: Mutex::new(None),
        });
        Ok(Self { inner })
    }

    /// Experiment identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The configuration the experiment was built with.
    pub fn config(&self) -> &ExperimentConfig<T> {
        &self.inner.config
    }

    /// The simulator replications run on.
    pub fn simulator(&self) -> &Arc<Simulator<T, F>> {
        &self.inner.simulator
    }

    /// Progress notifications.
    pub fn events(&self) -> &EventBus<ExperimentEvent, ExperimentNotification> {
        &self.inner.events
    }

    /// Launch the first remaining replication.
    ///
    /// Fails with [`StateError::ExperimentRunning`] while a replication
    /// chain is in progress and with [`StateError::ReplicationsExhausted`]
    /// once every replication has run; call [`reset`](Self::reset) to run
    /// again.
    pub fn start(&self) -> Result<(), SimError> {
        let inner = &self.inner;
        let first = {
            let mut progress = inner.progress.lock();
            if progress.running {
                return Err(StateError::ExperimentRunning.into());
            }
            let next = progress.index.map_or(0, |i| i + 1);
            if next >= inner.config.replications {
                return Err(StateError::ReplicationsExhausted {
                    count: inner.config.replications,
                }
                .into());
            }
            progress.running = true;
            progress.ended = false;
            next == 0
        };
        if first {
            info!(
                experiment = %inner.id,
                replications = inner.config.replications,
                "experiment started"
            );
            inner.publish(ExperimentEvent::StartExperiment, None);
        }
        inner.start_next_replication().inspect_err(|_| {
            inner.progress.lock().running = false;
        })
    }

    /// Build the next replication without starting it.
    ///
    /// Advances the replication index and discards the previous
    /// replication's statistics namespace.
    pub fn make_experiment_replication(&self) -> Result<Replication<T>, StateError> {
        self.inner.make_experiment_replication()
    }

    /// Forget completed replications and summaries so the experiment can
    /// run again from replication 0.
    ///
    /// Rejected while a replication is running. A chain stalled by a
    /// propagation error can be reset.
    pub fn reset(&self) -> Result<(), StateError> {
        let inner = &self.inner;
        let mut progress = inner.progress.lock();
        if progress.running && inner.simulator.is_starting_or_running() {
            return Err(StateError::ExperimentRunning);
        }
        *progress = Progress::default();
        inner.summaries.clear();
        debug!(experiment = %inner.id, "experiment reset");
        Ok(())
    }

    /// Copy of the cross-replication summaries, in first-recorded order.
    pub fn get_summary_statistics(&self) -> IndexMap<String, SummaryStatistic> {
        self.inner.summaries.snapshot()
    }

    /// The live summary registry.
    pub fn summaries(&self) -> &Arc<SummaryRegistry> {
        &self.inner.summaries
    }

    /// Block until the last replication completes. Returns `false` on
    /// timeout.
    pub fn wait_until_ended(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.inner.progress.lock();
        while !progress.ended {
            if self
                .inner
                .ended
                .wait_until(&mut progress, deadline)
                .timed_out()
            {
                return progress.ended;
            }
        }
        true
    }

    /// Ids of completed replications, in completion order.
    pub fn completed_replications(&self) -> Vec<String> {
        self.inner
            .progress
            .lock()
            .completed
            .iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Index of the replication in progress (or last run), `None` before
    /// the first start.
    pub fn current_replication_index(&self) -> Option<usize> {
        self.inner.progress.lock().index
    }

    /// Whether a replication chain is in progress.
    pub fn is_running(&self) -> bool {
        self.inner.progress.lock().running
    }

    /// Whether every replication has completed.
    pub fn is_ended(&self) -> bool {
        self.inner.progress.lock().ended
    }
}

impl<T: Timeline, F: Formalism<T>> ExperimentInner<T, F> {
    fn publish(&self, kind: ExperimentEvent, replication: Option<(usize, Arc<str>)>) {
        let (index, replication) = match replication {
            Some((index, id)) => (Some(index), Some(id)),
            None => (None, None),
        };
        self.events.publish(
            kind,
            &ExperimentNotification {
                kind,
                experiment: Arc::clone(&self.id),
                index,
                replication,
            },
        );
    }

    fn make_experiment_replication(&self) -> Result<Replication<T>, StateError> {
        let (index, id) = {
            let mut progress = self.progress.lock();
            let index = progress.index.map_or(0, |i| i + 1);
            if index >= self.config.replications {
                return Err(StateError::ReplicationsExhausted {
                    count: self.config.replications,
                });
            }
            let id: Arc<str> = Arc::from(format!("{}-{index}", self.id));
            progress.index = Some(index);
            progress.current = Some(Arc::clone(&id));
            (index, id)
        };
        if let Some(previous) = self.simulator.replication() {
            previous.statistics().clear();
        }
        let context = ExperimentContext::new(
            Arc::clone(&self.id),
            self.config.replications,
            Arc::clone(&self.summaries),
        );
        Ok(Replication::for_experiment(
            id,
            index,
            self.config.treatment.clone(),
            self.config.base_seed,
            context,
        ))
    }

    fn start_next_replication(&self) -> Result<(), SimError> {
        let replication = self.make_experiment_replication()?;
        let index = replication.index();
        let id = replication.shared_id();
        {
            let mut model = self.model.lock();
            self.simulator.initialize(replication, &mut **model)?;
        }
        self.listen_for_end();
        debug!(experiment = %self.id, replication = %id, "starting replication");
        self.publish(ExperimentEvent::StartReplication, Some((index, Arc::clone(&id))));
        self.simulator.start()?;
        Ok(())
    }

    fn listen_for_end(&self) {
        let weak = self.this.clone();
        let id = self.simulator.events().subscribe_scoped(
            SimulatorEvent::EndReplication,
            SubscriptionScope::Replication,
            move |n: &Notification<T>| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Payload::Replication { index, id } = &n.payload {
                    let (index, id) = (*index, Arc::clone(id));
                    let weak = Weak::clone(&weak);
                    inner.simulator.after_end_replication(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.replication_ended(index, &id);
                        }
                    });
                }
            },
        );
        *self.subscription.lock() = Some(id);
    }

    /// Runs after every END_REPLICATION subscriber, on the thread that
    /// ended the replication with the simulator lock held.
    fn replication_ended(&self, index: usize, id: &Arc<str>) {
        let finished = {
            let mut progress = self.progress.lock();
            if !progress.running || progress.current.as_ref() != Some(id) {
                return;
            }
            progress.completed.push(Arc::clone(id));
            let finished = index + 1 >= self.config.replications;
            if finished {
                progress.running = false;
                progress.ended = true;
                self.ended.notify_all();
            }
            finished
        };
        self.publish(ExperimentEvent::EndReplication, Some((index, Arc::clone(id))));

        if finished {
            info!(
                experiment = %self.id,
                replications = self.config.replications,
                "experiment ended"
            );
            self.publish(ExperimentEvent::EndExperiment, None);
            return;
        }
        if let Err(err) = self.start_next_replication() {
            error!(experiment = %self.id, error = %err, "could not start next replication");
            self.progress.lock().running = false;
        }
    }
}

impl<T: Timeline, F: Formalism<T>> Drop for ExperimentInner<T, F> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get_mut().take() {
            self.simulator.events().unsubscribe(id);
        }
    }
}

impl<T: Timeline, F: Formalism<T>> fmt::Debug for Experiment<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.inner.progress.lock();
        f.debug_struct("Experiment")
            .field("id", &self.inner.id)
            .field("replications", &self.inner.config.replications)
            .field("index", &progress.index)
            .field("completed", &progress.completed.len())
            .field("running", &progress.running)
            .field("ended", &progress.ended)
            .finish()
    }
}
