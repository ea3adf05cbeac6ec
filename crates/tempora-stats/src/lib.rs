//! Replication-aware statistics for Tempora.
//!
//! [`Tally`] collects unweighted observations; [`Persistent`] tracks a
//! level over simulated time and reports its time-weighted moments. Both
//! bind into the current replication's statistics namespace, discard
//! observations made before WARMUP, and at END_REPLICATION record their
//! final mean into the owning experiment's summaries.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod collector;
pub mod persistent;
pub mod tally;

pub use collector::{Observation, ObservationBus, StatisticEvent};
pub use persistent::Persistent;
pub use tally::Tally;
