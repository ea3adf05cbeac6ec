//! Simulator state machine, replications and experiments for Tempora.
//!
//! A [`Simulator`] owns simulated time and runs one [`Formalism`] on a
//! dedicated worker thread, publishing lifecycle notifications as it
//! goes. A [`Replication`] binds a [`RunControl`] and a statistics
//! namespace to one run; an [`Experiment`] chains replications of a
//! [`Model`] and aggregates what its statistics report.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod experiment;
pub mod formalism;
pub mod metrics;
pub mod replication;
pub mod simulator;
pub mod summary;
pub mod treatment;
mod worker;

pub use config::{ExperimentConfig, SimulatorConfig};
pub use context::{ModelContext, SimulatorHandle, StepContext};
pub use experiment::{Experiment, ExperimentEvent, ExperimentNotification};
pub use formalism::{Formalism, Model};
pub use metrics::SimulatorMetrics;
pub use replication::{ExperimentContext, Replication, Statistic, StatisticsContext};
pub use simulator::Simulator;
pub use summary::SummaryRegistry;
pub use treatment::{RunControl, Treatment};
