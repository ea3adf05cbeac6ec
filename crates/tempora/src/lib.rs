//! Tempora: a replicated simulation control core.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Tempora sub-crates. For most users, adding `tempora` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tempora::prelude::*;
//!
//! // A formalism with one unit per unit of simulated time.
//! struct Clock {
//!     next: SimTime<f64>,
//! }
//!
//! impl Formalism<f64> for Clock {
//!     fn name(&self) -> &str {
//!         "clock"
//!     }
//!     fn reset(&mut self, start: SimTime<f64>) {
//!         self.next = start.plus(1.0);
//!     }
//!     fn next_time(&self) -> Option<SimTime<f64>> {
//!         Some(self.next)
//!     }
//!     fn step(&mut self, ctx: &mut StepContext<'_, f64>) -> Result<(), PropagationError> {
//!         ctx.set_time(self.next).map_err(|source| PropagationError::State {
//!             hook: "clock".into(),
//!             source,
//!         })?;
//!         self.next = self.next.plus(1.0);
//!         Ok(())
//!     }
//! }
//!
//! struct Idle;
//!
//! impl Model<f64, Clock> for Idle {
//!     fn construct(
//!         &mut self,
//!         _ctx: &ModelContext<'_, f64>,
//!         _clock: &mut Clock,
//!     ) -> Result<(), PropagationError> {
//!         Ok(())
//!     }
//! }
//!
//! let clock = Clock { next: SimTime::zero() };
//! let sim = Arc::new(Simulator::new(clock, SimulatorConfig::default())?);
//! let treatment = RunControl::new("base", 0.0, 2.0, 10.0)?;
//! let config = ExperimentConfig::new("demo", treatment, 3);
//! let experiment = Experiment::new(config, Arc::clone(&sim), Idle)?;
//!
//! experiment.start()?;
//! assert!(experiment.wait_until_ended(Duration::from_secs(10)));
//! assert_eq!(experiment.completed_replications(), ["demo-0", "demo-1", "demo-2"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tempora-core` | Simulated time, errors, states, event registry, accumulators |
//! | [`engine`] | `tempora-engine` | Simulator, replications, treatments, experiments |
//! | [`stats`] | `tempora-stats` | `Tally` and `Persistent` statistics |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types (`tempora-core`).
///
/// Simulated time over the [`types::Timeline`] bindings, the error
/// taxonomy, run and replication states, and the per-producer
/// [`types::EventBus`].
pub use tempora_core as types;

/// Simulator, replications and experiments (`tempora-engine`).
///
/// [`engine::Simulator`] drives a [`engine::Formalism`] on its worker
/// thread; [`engine::Experiment`] chains replications of one treatment.
pub use tempora_engine as engine;

/// Replication-aware statistics (`tempora-stats`).
pub use tempora_stats as stats;

/// Common imports for typical Tempora usage.
///
/// ```rust
/// use tempora::prelude::*;
/// ```
pub mod prelude {
    // Time
    pub use tempora_core::{SimTime, TimeUnit, Timeline};

    // Events and states
    pub use tempora_core::{
        EventBus, Notification, Payload, ReplicationState, RunState, SimulatorEvent,
        SubscriptionScope,
    };

    // Errors
    pub use tempora_core::{ConfigError, PropagationError, SimError, StateError};

    // Engine
    pub use tempora_engine::{
        Experiment, ExperimentConfig, Formalism, Model, ModelContext, Replication, RunControl,
        Simulator, SimulatorConfig, SimulatorHandle, StepContext,
    };

    // Statistics
    pub use tempora_stats::{Persistent, Tally};
}
