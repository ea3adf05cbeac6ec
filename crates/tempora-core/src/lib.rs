//! Core types for the Tempora simulation control core.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! simulated-time algebra, the error taxonomy, the run and replication
//! state enums, the per-producer lifecycle event registry, and the running
//! accumulators that statistics collectors build on.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod accumulator;
pub mod error;
pub mod event;
pub mod state;
pub mod time;

pub use accumulator::{
    inverse_normal_cdf, ConfidenceInterval, RunningStats, SummaryStatistic, WeightedStats,
};
pub use error::{ConfigError, PropagationError, SimError, StateError};
pub use event::{
    EventBus, LifecycleBus, Notification, Payload, SimulatorEvent, SubscriptionId,
    SubscriptionScope,
};
pub use state::{ReplicationState, RunState};
pub use time::{
    compare_durations, SimTime, SimTimeCalendar, SimTimeDouble, SimTimeDoubleUnit, SimTimeFloat,
    SimTimeFloatUnit, SimTimeLong, SimTimeLongUnit, TimeUnit, Timeline, UnitDuration, UnitTime,
    UnitValue,
};
