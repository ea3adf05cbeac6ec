//! Timing parameters of one replication.
//!
//! [`RunControl`] (also exported as [`Treatment`]) is validated at
//! construction and immutable afterwards. Experiments hand a clone of it
//! to every replication, so all replications start at the same instant.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tempora_core::{ConfigError, SimTime, Timeline};

/// Start time, warmup length and run length of a replication.
///
/// Invariants, checked by [`RunControl::new`]:
/// - the id is not empty,
/// - every time value is finite,
/// - `run_length > 0`,
/// - `0 <= warmup_length < run_length`.
///
/// A warmup equal to the run length is rejected, so WARMUP always fires
/// strictly before the end time:
///
/// ```
/// use tempora_core::ConfigError;
/// use tempora_engine::RunControl;
///
/// match RunControl::<f64>::new("rc", 10.0, 5.0, 5.0) {
///     Err(ConfigError::WarmupNotShorterThanRun { .. }) => {}
///     other => panic!("expected WarmupNotShorterThanRun, got {other:?}"),
/// }
/// ```
#[derive(Clone)]
pub struct RunControl<T: Timeline> {
    id: Arc<str>,
    start: SimTime<T>,
    warmup_length: T::Duration,
    run_length: T::Duration,
}

/// Alternative name used when talking about experiments.
pub type Treatment<T> = RunControl<T>;

impl<T: Timeline> RunControl<T> {
    /// Validate and build a run control.
    pub fn new(
        id: impl Into<String>,
        start: T,
        warmup_length: T::Duration,
        run_length: T::Duration,
    ) -> Result<Self, ConfigError> {
        let id: String = id.into();
        let start = SimTime::new(start);
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyId {
                field: "run control id",
            });
        }
        if !start.is_finite() {
            return Err(ConfigError::NonFinite {
                field: "start time",
            });
        }
        if !T::duration_is_finite(&warmup_length) {
            return Err(ConfigError::NonFinite {
                field: "warmup length",
            });
        }
        if !T::duration_is_finite(&run_length) {
            return Err(ConfigError::NonFinite {
                field: "run length",
            });
        }

        let zero = T::zero_duration();
        if T::compare_duration(&run_length, &zero) != Ordering::Greater {
            return Err(ConfigError::NonPositiveRunLength {
                value: format!("{run_length:?}"),
            });
        }
        if T::compare_duration(&warmup_length, &zero) == Ordering::Less {
            return Err(ConfigError::NegativeWarmup {
                value: format!("{warmup_length:?}"),
            });
        }
        if T::compare_duration(&warmup_length, &run_length) != Ordering::Less {
            return Err(ConfigError::WarmupNotShorterThanRun {
                warmup: format!("{warmup_length:?}"),
                run: format!("{run_length:?}"),
            });
        }

        Ok(Self {
            id: Arc::from(id),
            start,
            warmup_length,
            run_length,
        })
    }

    /// Identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// First simulated instant of a replication.
    pub fn start_time(&self) -> SimTime<T> {
        self.start
    }

    /// `start + warmup_length`.
    pub fn warmup_time(&self) -> SimTime<T> {
        self.start.plus(self.warmup_length)
    }

    /// `start + run_length`.
    pub fn end_time(&self) -> SimTime<T> {
        self.start.plus(self.run_length)
    }

    /// Length of the warmup period.
    pub fn warmup_length(&self) -> T::Duration {
        self.warmup_length
    }

    /// Length of the whole run, warmup included.
    pub fn run_length(&self) -> T::Duration {
        self.run_length
    }

    /// Whether statistics must wait for a WARMUP notification.
    pub fn has_warmup(&self) -> bool {
        T::compare_duration(&self.warmup_length, &T::zero_duration()) == Ordering::Greater
    }
}

impl<T: Timeline> PartialEq for RunControl<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.start == other.start
            && T::compare_duration(&self.warmup_length, &other.warmup_length) == Ordering::Equal
            && T::compare_duration(&self.run_length, &other.run_length) == Ordering::Equal
    }
}

impl<T: Timeline> Eq for RunControl<T> {}

impl<T: Timeline> Hash for RunControl<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.start.hash(state);
        (T::duration_as_f64(&self.warmup_length) + 0.0)
            .to_bits()
            .hash(state);
        (T::duration_as_f64(&self.run_length) + 0.0)
            .to_bits()
            .hash(state);
    }
}

impl<T: Timeline> fmt::Debug for RunControl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("warmup_length", &self.warmup_length)
            .field("run_length", &self.run_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempora_core::{TimeUnit, UnitDuration, UnitTime};

    #[test]
    fn derived_times() {
        let rc = RunControl::<f64>::new("rc", 10.0, 1.0, 12.0).unwrap();
        assert_eq!(rc.warmup_time().get(), 11.0);
        assert_eq!(rc.end_time().get(), 22.0);
        assert_eq!(rc.start_time().get(), 10.0);
        assert_eq!(rc.warmup_length(), 1.0);
        assert_eq!(rc.run_length(), 12.0);
        assert!(rc.has_warmup());
    }

    #[test]
    fn warmup_equal_to_run_is_rejected() {
        match RunControl::<f64>::new("rc", 10.0, 5.0, 5.0) {
            Err(ConfigError::WarmupNotShorterThanRun { .. }) => {}
            other => panic!("expected WarmupNotShorterThanRun, got {other:?}"),
        }
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(
            RunControl::<f64>::new("rc", 0.0, 0.0, 0.0),
            Err(ConfigError::NonPositiveRunLength { .. })
        ));
        assert!(matches!(
            RunControl::<f64>::new("rc", 0.0, -1.0, 10.0),
            Err(ConfigError::NegativeWarmup { .. })
        ));
        assert!(matches!(
            RunControl::<f64>::new("", 0.0, 0.0, 10.0),
            Err(ConfigError::EmptyId { .. })
        ));
        assert!(matches!(
            RunControl::<f64>::new("rc", f64::NAN, 0.0, 10.0),
            Err(ConfigError::NonFinite { field: "start time" })
        ));
        assert!(matches!(
            RunControl::<f64>::new("rc", 0.0, 0.0, f64::INFINITY),
            Err(ConfigError::NonFinite { field: "run length" })
        ));
        assert!(matches!(
            RunControl::<i64>::new("rc", 0, 0, -3),
            Err(ConfigError::NonPositiveRunLength { .. })
        ));
    }

    #[test]
    fn zero_warmup_is_allowed() {
        let rc = RunControl::<i64>::new("rc", 5, 0, 10).unwrap();
        assert!(!rc.has_warmup());
        assert_eq!(rc.warmup_time(), rc.start_time());
    }

    #[test]
    fn unit_treatment_compares_across_units() {
        let start = UnitTime::new(0.0, TimeUnit::Hour);
        let rc = RunControl::<UnitTime<f64>>::new(
            "units",
            start,
            UnitDuration::new(30.0, TimeUnit::Minute),
            UnitDuration::new(2.0, TimeUnit::Hour),
        )
        .unwrap();
        assert_eq!(rc.end_time().get().as_seconds(), 7200.0);

        // 90 minutes is longer than one hour.
        assert!(RunControl::<UnitTime<f64>>::new(
            "units",
            start,
            UnitDuration::new(90.0, TimeUnit::Minute),
            UnitDuration::new(1.0, TimeUnit::Hour),
        )
        .is_err());
    }

    #[test]
    fn equality_and_hash_are_by_value() {
        let a = RunControl::<f64>::new("rc", 0.0, 1.0, 5.0).unwrap();
        let b = RunControl::<f64>::new("rc", 0.0, 1.0, 5.0).unwrap();
        let c = RunControl::<f64>::new("rc", 0.0, 2.0, 5.0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    proptest! {
        #[test]
        fn valid_inputs_construct(
            start in -1e6f64..1e6,
            run in 1e-3f64..1e6,
            frac in 0.0f64..0.999,
        ) {
            let warmup = run * frac;
            let rc = RunControl::<f64>::new("p", start, warmup, run).unwrap();
            prop_assert_eq!(rc.end_time().get(), start + run);
            prop_assert_eq!(rc.warmup_time().get(), start + warmup);
        }

        #[test]
        fn warmup_not_below_run_fails(
            run in 1e-3f64..1e6,
            extra in 0.0f64..1e3,
        ) {
            prop_assert!(RunControl::<f64>::new("p", 0.0, run + extra, run).is_err());
        }

        #[test]
        fn non_positive_run_fails(run in -1e6f64..=0.0) {
            prop_assert!(RunControl::<f64>::new("p", 0.0, 0.0, run).is_err());
        }
    }
}
