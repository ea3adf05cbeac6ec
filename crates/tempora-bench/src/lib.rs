//! Benchmark profiles for the Tempora simulation core.
//!
//! Provides a reference workload for benchmarks and examples:
//!
//! - [`QueueModel`]: single-server queue with exponential arrivals and
//!   service, tallying waiting times and tracking the queue length
//! - [`queue_treatment`]: warmup 100, run 1000
//! - [`queue_experiment`]: the two combined over an event list

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tempora_core::{ConfigError, PropagationError, SimError, SimTime, StateError};
use tempora_engine::{
    Experiment, ExperimentConfig, Model, ModelContext, RunControl, Simulator, SimulatorConfig,
    StepContext,
};
use tempora_stats::{Persistent, Tally};
use tempora_test_utils::EventListFormalism;

type Events = EventListFormalism<f64>;

fn schedule_error(source: StateError) -> PropagationError {
    PropagationError::State {
        hook: "queue.schedule".into(),
        source,
    }
}

fn bind_error(hook: &'static str) -> impl Fn(SimError) -> PropagationError {
    move |e| PropagationError::failed(hook, e.to_string())
}

fn exponential(rng: &mut ChaCha8Rng, mean: f64) -> f64 {
    let u: f64 = rng.random();
    -mean * (1.0 - u).ln()
}

/// One replication's server state.
struct Station {
    arrivals: ChaCha8Rng,
    services: ChaCha8Rng,
    arrival_mean: f64,
    service_mean: f64,
    waiting: VecDeque<f64>,
    busy: bool,
    wait: Tally<f64>,
    length: Persistent<f64>,
}

type Shared = Arc<Mutex<Station>>;

fn arrive(
    station: Shared,
) -> impl FnOnce(&mut StepContext<'_, f64>, &mut Events) -> Result<(), PropagationError> + Send + 'static
{
    move |ctx, events| {
        let now = ctx.time();
        let (gap, service) = {
            let mut s = station.lock();
            let service = if s.busy {
                s.waiting.push_back(now.get());
                let len = s.waiting.len() as f64;
                s.length.ingest(len);
                None
            } else {
                s.busy = true;
                s.wait.ingest(0.0);
                let mean = s.service_mean;
                Some(exponential(&mut s.services, mean))
            };
            let mean = s.arrival_mean;
            (exponential(&mut s.arrivals, mean), service)
        };
        if let Some(d) = service {
            events
                .schedule(now.plus(d), depart(Arc::clone(&station)))
                .map_err(schedule_error)?;
        }
        events
            .schedule(now.plus(gap), arrive(station))
            .map_err(schedule_error)
    }
}

fn depart(
    station: Shared,
) -> impl FnOnce(&mut StepContext<'_, f64>, &mut Events) -> Result<(), PropagationError> + Send + 'static
{
    move |ctx, events| {
        let now = ctx.time();
        let service = {
            let mut s = station.lock();
            match s.waiting.pop_front() {
                Some(arrived) => {
                    s.wait.ingest(now.get() - arrived);
                    let len = s.waiting.len() as f64;
                    s.length.ingest(len);
                    let mean = s.service_mean;
                    Some(exponential(&mut s.services, mean))
                }
                None => {
                    s.busy = false;
                    None
                }
            }
        };
        match service {
            Some(d) => events
                .schedule(now.plus(d), depart(station))
                .map_err(schedule_error),
            None => Ok(()),
        }
    }
}

/// Single-server FIFO queue.
///
/// Binds a `"wait"` [`Tally`] of waiting times and a `"queue_length"`
/// [`Persistent`] per replication. Arrivals and services draw from the
/// replication's `"arrivals"` and `"services"` streams.
pub struct QueueModel {
    arrival_mean: f64,
    service_mean: f64,
}

impl QueueModel {
    /// A queue with the given mean inter-arrival and service times.
    pub fn new(arrival_mean: f64, service_mean: f64) -> Self {
        Self {
            arrival_mean,
            service_mean,
        }
    }
}

impl Model<f64, Events> for QueueModel {
    fn construct(
        &mut self,
        ctx: &ModelContext<'_, f64>,
        events: &mut Events,
    ) -> Result<(), PropagationError> {
        let wait = Tally::new("wait", ctx.simulator()).map_err(bind_error("wait"))?;
        let length = Persistent::with_initial("queue_length", ctx.simulator(), 0.0)
            .map_err(bind_error("queue_length"))?;
        let mut arrivals = ctx.replication().stream("arrivals");
        let first = exponential(&mut arrivals, self.arrival_mean);
        let station = Arc::new(Mutex::new(Station {
            arrivals,
            services: ctx.replication().stream("services"),
            arrival_mean: self.arrival_mean,
            service_mean: self.service_mean,
            waiting: VecDeque::new(),
            busy: false,
            wait,
            length,
        }));
        let at: SimTime<f64> = ctx.time().plus(first);
        events.schedule(at, arrive(station)).map_err(schedule_error)
    }
}

/// Start 0, warmup 100, run 1000.
pub fn queue_treatment() -> Result<RunControl<f64>, ConfigError> {
    RunControl::new("queue", 0.0, 100.0, 1000.0)
}

/// An experiment of `replications` runs of a queue at utilisation 0.8.
pub fn queue_experiment(
    replications: usize,
    seed: u64,
) -> Result<Experiment<f64, Events>, ConfigError> {
    let sim = Arc::new(Simulator::new(EventListFormalism::new(), SimulatorConfig::default())?);
    let config = ExperimentConfig::new("queue", queue_treatment()?, replications).with_seed(seed);
    Experiment::new(config, sim, QueueModel::new(1.0, 0.8))
}
