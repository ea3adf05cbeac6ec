//! Simulated time: the [`Timeline`] trait and the [`SimTime`] value type.
//!
//! A [`Timeline`] pairs an absolute representation (an instant) with a
//! relative representation (its [`Duration`](Timeline::Duration)). All
//! algebra lives once in [`SimTime`]; the concrete bindings below only say
//! how to add, subtract, and order their representation.
//!
//! | Alias | Absolute | Relative |
//! |-------|----------|----------|
//! | [`SimTimeDouble`] | `f64` | `f64` |
//! | [`SimTimeFloat`] | `f32` | `f32` |
//! | [`SimTimeLong`] | `i64` | `i64` |
//! | [`SimTimeDoubleUnit`] | [`UnitTime<f64>`] | [`UnitDuration<f64>`] |
//! | [`SimTimeFloatUnit`] | [`UnitTime<f32>`] | [`UnitDuration<f32>`] |
//! | [`SimTimeLongUnit`] | [`UnitTime<i64>`] | [`UnitDuration<i64>`] |
//! | [`SimTimeCalendar`] | `DateTime<Utc>` | [`UnitDuration<f64>`] |
//!
//! Mixing instantiations (adding a `UnitDuration` to a `SimTimeDouble`,
//! subtracting a calendar instant from a long instant) does not compile.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{AddAssign, SubAssign};

use chrono::{DateTime, TimeDelta, Utc};

// ── Timeline ───────────────────────────────────────────────────────

/// An absolute time representation with its matching relative type.
///
/// Implementations must keep [`compare`](Timeline::compare) a total order
/// that agrees with the sign of [`diff`](Timeline::diff): `a.diff(b)` is
/// positive exactly when `a` orders after `b`.
pub trait Timeline: Copy + fmt::Debug + Send + Sync + 'static {
    /// Relative (duration) representation.
    type Duration: Copy + fmt::Debug + Send + Sync + 'static;

    /// The zero instant of this representation.
    fn zero() -> Self;

    /// The zero-length duration.
    fn zero_duration() -> Self::Duration;

    /// `self + by`.
    fn advance(self, by: Self::Duration) -> Self;

    /// `self - by`.
    fn retreat(self, by: Self::Duration) -> Self;

    /// Signed distance from `earlier` to `self`.
    fn diff(self, earlier: Self) -> Self::Duration;

    /// Total order over instants.
    fn compare(&self, other: &Self) -> Ordering;

    /// Total order over durations.
    fn compare_duration(a: &Self::Duration, b: &Self::Duration) -> Ordering;

    /// Magnitude of a duration as a float. Used for time weighting; unit
    /// bindings report seconds.
    fn duration_as_f64(d: &Self::Duration) -> f64;

    /// Whether the instant is a usable (finite) value.
    fn is_finite(&self) -> bool {
        true
    }

    /// Whether the duration is a usable (finite) value.
    fn duration_is_finite(_d: &Self::Duration) -> bool {
        true
    }
}

// ── SimTime ────────────────────────────────────────────────────────

/// A simulated instant over the timeline `T`.
///
/// `SimTime` is `Copy`: taking an independent instant before mutating is
/// just a copy. In-place arithmetic uses [`add`](SimTime::add) and
/// [`subtract`](SimTime::subtract); [`plus`](SimTime::plus) and
/// [`minus`](SimTime::minus) return a new value and leave the receiver
/// untouched. The comparison methods `lt`, `le`, `gt`, `ge`, `eq` and `ne`
/// come from the [`Ord`] implementation; `+=` and `-=` with a duration are
/// the operator forms of `add` and `subtract`.
#[derive(Clone, Copy)]
pub struct SimTime<T: Timeline>(T);

impl<T: Timeline> SimTime<T> {
    /// Wrap an absolute value.
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// The zero instant.
    pub fn zero() -> Self {
        Self(T::zero())
    }

    /// The wrapped absolute value.
    pub fn get(&self) -> T {
        self.0
    }

    /// Replace the absolute value.
    pub fn set(&mut self, value: T) {
        self.0 = value;
    }

    /// Reset to the zero instant.
    pub fn set_zero(&mut self) {
        self.0 = T::zero();
    }

    /// An independent copy of this instant.
    pub fn copy(&self) -> Self {
        *self
    }

    /// Advance in place by `by`.
    pub fn add(&mut self, by: T::Duration) -> &mut Self {
        self.0 = self.0.advance(by);
        self
    }

    /// Move back in place by `by`.
    pub fn subtract(&mut self, by: T::Duration) -> &mut Self {
        self.0 = self.0.retreat(by);
        self
    }

    /// A new instant `by` after this one.
    pub fn plus(&self, by: T::Duration) -> Self {
        Self(self.0.advance(by))
    }

    /// A new instant `by` before this one.
    pub fn minus(&self, by: T::Duration) -> Self {
        Self(self.0.retreat(by))
    }

    /// Signed duration from `earlier` to `self`.
    pub fn diff(&self, earlier: &Self) -> T::Duration {
        self.0.diff(earlier.0)
    }

    /// Whether the wrapped value is finite.
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }

    /// Ordering relative to the zero instant.
    pub fn cmp_zero(&self) -> Ordering {
        self.0.compare(&T::zero())
    }

    /// `self == 0`.
    pub fn eq_zero(&self) -> bool {
        self.cmp_zero() == Ordering::Equal
    }

    /// `self != 0`.
    pub fn ne_zero(&self) -> bool {
        self.cmp_zero() != Ordering::Equal
    }

    /// `self < 0`.
    pub fn lt_zero(&self) -> bool {
        self.cmp_zero() == Ordering::Less
    }

    /// `self <= 0`.
    pub fn le_zero(&self) -> bool {
        self.cmp_zero() != Ordering::Greater
    }

    /// `self > 0`.
    pub fn gt_zero(&self) -> bool {
        self.cmp_zero() == Ordering::Greater
    }

    /// `self >= 0`.
    pub fn ge_zero(&self) -> bool {
        self.cmp_zero() != Ordering::Less
    }
}

impl<T: Timeline> From<T> for SimTime<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T: Timeline> PartialEq for SimTime<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0) == Ordering::Equal
    }
}

impl<T: Timeline> Eq for SimTime<T> {}

impl<T: Timeline> PartialOrd for SimTime<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Timeline> Ord for SimTime<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}

impl<T: Timeline> Hash for SimTime<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Equal instants in different units or signs of zero hash alike.
        let offset = T::duration_as_f64(&self.0.diff(T::zero())) + 0.0;
        offset.to_bits().hash(state);
    }
}

impl<T: Timeline> AddAssign<T::Duration> for SimTime<T> {
    fn add_assign(&mut self, rhs: T::Duration) {
        SimTime::add(self, rhs);
    }
}

impl<T: Timeline> SubAssign<T::Duration> for SimTime<T> {
    fn sub_assign(&mut self, rhs: T::Duration) {
        self.subtract(rhs);
    }
}

impl<T: Timeline> fmt::Debug for SimTime<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimTime({:?})", self.0)
    }
}

impl<T: Timeline + fmt::Display> fmt::Display for SimTime<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Compare two durations of the same timeline.
pub fn compare_durations<T: Timeline>(a: &T::Duration, b: &T::Duration) -> Ordering {
    T::compare_duration(a, b)
}

// ── Plain numeric bindings ─────────────────────────────────────────

macro_rules! float_timeline {
    ($t:ty) => {
        impl Timeline for $t {
            type Duration = $t;

            fn zero() -> Self {
                0.0
            }

            fn zero_duration() -> Self::Duration {
                0.0
            }

            fn advance(self, by: Self::Duration) -> Self {
                self + by
            }

            fn retreat(self, by: Self::Duration) -> Self {
                self - by
            }

            fn diff(self, earlier: Self) -> Self::Duration {
                self - earlier
            }

            fn compare(&self, other: &Self) -> Ordering {
                self.partial_cmp(other)
                    .unwrap_or_else(|| self.total_cmp(other))
            }

            fn compare_duration(a: &Self::Duration, b: &Self::Duration) -> Ordering {
                a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b))
            }

            fn duration_as_f64(d: &Self::Duration) -> f64 {
                f64::from(*d)
            }

            fn is_finite(&self) -> bool {
                <$t>::is_finite(*self)
            }

            fn duration_is_finite(d: &Self::Duration) -> bool {
                d.is_finite()
            }
        }
    };
}

float_timeline!(f64);
float_timeline!(f32);

impl Timeline for i64 {
    type Duration = i64;

    fn zero() -> Self {
        0
    }

    fn zero_duration() -> Self::Duration {
        0
    }

    fn advance(self, by: Self::Duration) -> Self {
        self.saturating_add(by)
    }

    fn retreat(self, by: Self::Duration) -> Self {
        self.saturating_sub(by)
    }

    fn diff(self, earlier: Self) -> Self::Duration {
        self.saturating_sub(earlier)
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn compare_duration(a: &Self::Duration, b: &Self::Duration) -> Ordering {
        a.cmp(b)
    }

    fn duration_as_f64(d: &Self::Duration) -> f64 {
        *d as f64
    }
}

// ── Physical units ─────────────────────────────────────────────────

/// Unit of a physical time quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    /// 1e-9 s.
    Nanosecond,
    /// 1e-6 s.
    Microsecond,
    /// 1e-3 s.
    Millisecond,
    /// SI base unit.
    Second,
    /// 60 s.
    Minute,
    /// 3600 s.
    Hour,
    /// 86 400 s.
    Day,
    /// 604 800 s.
    Week,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> f64 {
        match self {
            Self::Nanosecond => 1e-9,
            Self::Microsecond => 1e-6,
            Self::Millisecond => 1e-3,
            Self::Second => 1.0,
            Self::Minute => 60.0,
            Self::Hour => 3_600.0,
            Self::Day => 86_400.0,
            Self::Week => 604_800.0,
        }
    }

    /// Short symbol used for display.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Nanosecond => "ns",
            Self::Microsecond => "us",
            Self::Millisecond => "ms",
            Self::Second => "s",
            Self::Minute => "min",
            Self::Hour => "h",
            Self::Day => "day",
            Self::Week => "wk",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Scalar storage for unit-aware times.
pub trait UnitValue: Copy + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Additive identity.
    const ZERO: Self;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Narrow from `f64` (integers round to nearest).
    fn from_f64(v: f64) -> Self;

    /// `self + rhs`.
    fn plus(self, rhs: Self) -> Self;

    /// `self - rhs`.
    fn minus(self, rhs: Self) -> Self;

    /// Total order.
    fn total(&self, other: &Self) -> Ordering;

    /// Whether the value is finite.
    fn finite(self) -> bool;
}

impl UnitValue for f64 {
    const ZERO: Self = 0.0;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }

    fn plus(self, rhs: Self) -> Self {
        self + rhs
    }

    fn minus(self, rhs: Self) -> Self {
        self - rhs
    }

    fn total(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.total_cmp(other))
    }

    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl UnitValue for f32 {
    const ZERO: Self = 0.0;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn plus(self, rhs: Self) -> Self {
        self + rhs
    }

    fn minus(self, rhs: Self) -> Self {
        self - rhs
    }

    fn total(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.total_cmp(other))
    }

    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl UnitValue for i64 {
    const ZERO: Self = 0;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v.round() as i64
    }

    fn plus(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }

    fn minus(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }

    fn total(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn finite(self) -> bool {
        true
    }
}

/// A time span carrying its physical unit.
#[derive(Clone, Copy, Debug)]
pub struct UnitDuration<V: UnitValue> {
    value: V,
    unit: TimeUnit,
}

impl<V: UnitValue> UnitDuration<V> {
    /// A span of `value` units.
    pub fn new(value: V, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// Shorthand for a span in seconds.
    pub fn seconds(value: V) -> Self {
        Self::new(value, TimeUnit::Second)
    }

    /// Magnitude in [`unit`](Self::unit).
    pub fn value(&self) -> V {
        self.value
    }

    /// The unit the magnitude is expressed in.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Length in seconds.
    pub fn as_seconds(&self) -> f64 {
        self.value.to_f64() * self.unit.seconds()
    }

    /// The same span re-expressed in `unit`.
    pub fn to_unit(&self, unit: TimeUnit) -> Self {
        if unit == self.unit {
            return *self;
        }
        Self::new(V::from_f64(self.as_seconds() / unit.seconds()), unit)
    }

    fn cmp_span(&self, other: &Self) -> Ordering {
        if self.unit == other.unit {
            self.value.total(&other.value)
        } else {
            self.as_seconds().total_cmp(&other.as_seconds())
        }
    }
}

impl<V: UnitValue> PartialEq for UnitDuration<V> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_span(other) == Ordering::Equal
    }
}

impl<V: UnitValue> PartialOrd for UnitDuration<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_span(other))
    }
}

impl<V: UnitValue> fmt::Display for UnitDuration<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// An instant measured from a zero point in a physical unit.
///
/// Arithmetic keeps the receiver's unit: adding a duration expressed in
/// minutes to an instant expressed in seconds yields seconds.
#[derive(Clone, Copy, Debug)]
pub struct UnitTime<V: UnitValue> {
    value: V,
    unit: TimeUnit,
}

impl<V: UnitValue> UnitTime<V> {
    /// An instant `value` units after zero.
    pub fn new(value: V, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// Magnitude in [`unit`](Self::unit).
    pub fn value(&self) -> V {
        self.value
    }

    /// The unit the magnitude is expressed in.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Offset from zero in seconds.
    pub fn as_seconds(&self) -> f64 {
        self.value.to_f64() * self.unit.seconds()
    }

    fn shifted(self, by: UnitDuration<V>, forward: bool) -> Self {
        let delta = by.to_unit(self.unit).value;
        let value = if forward {
            self.value.plus(delta)
        } else {
            self.value.minus(delta)
        };
        Self::new(value, self.unit)
    }
}

impl<V: UnitValue> fmt::Display for UnitTime<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

impl<V: UnitValue> Timeline for UnitTime<V> {
    type Duration = UnitDuration<V>;

    fn zero() -> Self {
        Self::new(V::ZERO, TimeUnit::Second)
    }

    fn zero_duration() -> Self::Duration {
        UnitDuration::new(V::ZERO, TimeUnit::Second)
    }

    fn advance(self, by: Self::Duration) -> Self {
        self.shifted(by, true)
    }

    fn retreat(self, by: Self::Duration) -> Self {
        self.shifted(by, false)
    }

    fn diff(self, earlier: Self) -> Self::Duration {
        let other = if earlier.unit == self.unit {
            earlier.value
        } else {
            V::from_f64(earlier.as_seconds() / self.unit.seconds())
        };
        UnitDuration::new(self.value.minus(other), self.unit)
    }

    fn compare(&self, other: &Self) -> Ordering {
        if self.unit == other.unit {
            self.value.total(&other.value)
        } else {
            self.as_seconds().total_cmp(&other.as_seconds())
        }
    }

    fn compare_duration(a: &Self::Duration, b: &Self::Duration) -> Ordering {
        a.cmp_span(b)
    }

    fn duration_as_f64(d: &Self::Duration) -> f64 {
        d.as_seconds()
    }

    fn is_finite(&self) -> bool {
        self.value.finite()
    }

    fn duration_is_finite(d: &Self::Duration) -> bool {
        d.value.finite()
    }
}

// ── Calendar ───────────────────────────────────────────────────────

impl Timeline for DateTime<Utc> {
    type Duration = UnitDuration<f64>;

    fn zero() -> Self {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn zero_duration() -> Self::Duration {
        UnitDuration::seconds(0.0)
    }

    fn advance(self, by: Self::Duration) -> Self {
        self + seconds_to_delta(by.as_seconds())
    }

    fn retreat(self, by: Self::Duration) -> Self {
        self - seconds_to_delta(by.as_seconds())
    }

    fn diff(self, earlier: Self) -> Self::Duration {
        let delta = self - earlier;
        let secs = match delta.num_nanoseconds() {
            Some(ns) => ns as f64 * 1e-9,
            None => delta.num_milliseconds() as f64 * 1e-3,
        };
        UnitDuration::seconds(secs)
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn compare_duration(a: &Self::Duration, b: &Self::Duration) -> Ordering {
        a.cmp_span(b)
    }

    fn duration_as_f64(d: &Self::Duration) -> f64 {
        d.as_seconds()
    }

    fn duration_is_finite(d: &Self::Duration) -> bool {
        d.as_seconds().is_finite()
    }
}

fn seconds_to_delta(secs: f64) -> TimeDelta {
    let ns = secs * 1e9;
    if ns.abs() < i64::MAX as f64 {
        TimeDelta::nanoseconds(ns.round() as i64)
    } else {
        TimeDelta::milliseconds((secs * 1e3).round() as i64)
    }
}

// ── Aliases ────────────────────────────────────────────────────────

/// Floating seconds for instants and durations.
pub type SimTimeDouble = SimTime<f64>;
/// Single-precision instants and durations.
pub type SimTimeFloat = SimTime<f32>;
/// Integer ticks for instants and durations.
pub type SimTimeLong = SimTime<i64>;
/// Unit-aware double-precision time.
pub type SimTimeDoubleUnit = SimTime<UnitTime<f64>>;
/// Unit-aware single-precision time.
pub type SimTimeFloatUnit = SimTime<UnitTime<f32>>;
/// Unit-aware integer time.
pub type SimTimeLongUnit = SimTime<UnitTime<i64>>;
/// Wall-clock calendar instants with unit-aware durations.
pub type SimTimeCalendar = SimTime<DateTime<Utc>>;
