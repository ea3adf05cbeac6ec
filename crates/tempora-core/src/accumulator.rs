//! Running accumulators used by statistics collectors and experiment
//! summaries.
//!
//! All three are single-pass and O(1) per observation. Moments use the
//! Welford/West updates so long replications do not lose precision.

// ── RunningStats ───────────────────────────────────────────────────

/// Unweighted running count, mean, variance, min and max.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl RunningStats {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation.
    pub fn ingest(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Discard every observation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sum of observations.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Arithmetic mean, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample variance (n - 1 denominator), `None` below two observations.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Smallest observation.
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest observation.
    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

// ── WeightedStats ──────────────────────────────────────────────────

/// Weighted running mean, variance, min and max.
///
/// Used for time-weighted statistics where each value is held for a
/// duration. Samples with zero (or invalid) weight are counted but touch
/// neither the moments nor min and max.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightedStats {
    count: u64,
    total_weight: f64,
    mean: f64,
    s: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl WeightedStats {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` held for `weight`.
    pub fn ingest(&mut self, value: f64, weight: f64) {
        self.count += 1;
        if !(weight.is_finite() && weight > 0.0) {
            return;
        }
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.total_weight += weight;
        let delta = value - self.mean;
        self.mean += delta * weight / self.total_weight;
        self.s += weight * delta * (value - self.mean);
    }

    /// Discard every observation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of samples, zero-weight ones included.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sum of weights.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Weighted mean, `None` until some weight has accumulated.
    pub fn mean(&self) -> Option<f64> {
        (self.total_weight > 0.0).then_some(self.mean)
    }

    /// Weighted population variance.
    pub fn variance(&self) -> Option<f64> {
        (self.total_weight > 0.0).then(|| self.s / self.total_weight)
    }

    /// Weighted population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Smallest sample.
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest sample.
    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

// ── SummaryStatistic ───────────────────────────────────────────────

/// Two-sided confidence interval around a mean.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceInterval {
    /// Confidence level in (0, 1).
    pub level: f64,
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
    /// Half of `upper - lower`.
    pub half_width: f64,
}

/// Cross-replication summary of one statistic.
///
/// Each replication feeds its final value; the summary reports the
/// unweighted moments over replications and a normal-approximation
/// confidence interval for their mean.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryStatistic {
    stats: RunningStats,
}

impl SummaryStatistic {
    /// An empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one replication's final value.
    pub fn ingest(&mut self, value: f64) {
        self.stats.ingest(value);
    }

    /// Underlying moments.
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Number of replications fed.
    pub fn count(&self) -> u64 {
        self.stats.count()
    }

    /// Mean across replications.
    pub fn mean(&self) -> Option<f64> {
        self.stats.mean()
    }

    /// Sample standard deviation across replications.
    pub fn std_dev(&self) -> Option<f64> {
        self.stats.std_dev()
    }

    /// Confidence interval for the mean at `level` (e.g. `0.95`).
    ///
    /// `None` with fewer than two values or a level outside (0, 1).
    pub fn confidence_interval(&self, level: f64) -> Option<ConfidenceInterval> {
        if !(level > 0.0 && level < 1.0) {
            return None;
        }
        let mean = self.stats.mean()?;
        let sd = self.stats.std_dev()?;
        let z = inverse_normal_cdf(1.0 - (1.0 - level) / 2.0);
        let half_width = z * sd / (self.stats.count() as f64).sqrt();
        Some(ConfidenceInterval {
            level,
            lower: mean - half_width,
            upper: mean + half_width,
            half_width,
        })
    }
}

/// Inverse of the standard normal CDF for `p` in (0, 1).
///
/// Acklam's rational approximation, relative error below 1.2e-9.
/// Returns NaN outside the open interval.
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if !(p > 0.0 && p < 1.0) {
        return f64::NAN;
    }
    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn empty_running_stats_report_none() {
        let s = RunningStats::new();
        assert_eq!(s.count(), 0);
        assert_eq!(s.mean(), None);
        assert_eq!(s.variance(), None);
        assert_eq!(s.min(), None);
    }

    #[test]
    fn running_stats_known_values() {
        let mut s = RunningStats::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.ingest(v);
        }
        assert_eq!(s.count(), 8);
        assert_eq!(s.sum(), 40.0);
        assert_eq!(s.mean(), Some(5.0));
        assert!(close(s.variance().unwrap(), 32.0 / 7.0));
        assert_eq!(s.min(), Some(2.0));
        assert_eq!(s.max(), Some(9.0));

        s.reset();
        assert_eq!(s, RunningStats::new());
    }

    #[test]
    fn weighted_mean_is_time_average() {
        let mut w = WeightedStats::new();
        // 0 for 2 units, 10 for 8 units.
        w.ingest(0.0, 2.0);
        w.ingest(10.0, 8.0);
        assert_eq!(w.total_weight(), 10.0);
        assert!(close(w.mean().unwrap(), 8.0));
        // E[x^2] - mean^2 = 80 - 64
        assert!(close(w.variance().unwrap(), 16.0));
    }

    #[test]
    fn unweighted_samples_are_only_counted() {
        let mut w = WeightedStats::new();
        w.ingest(3.0, 1.0);
        w.ingest(100.0, 0.0);
        w.ingest(-100.0, -2.0);
        w.ingest(50.0, f64::NAN);
        assert_eq!(w.mean(), Some(3.0));
        assert_eq!(w.min(), Some(3.0));
        assert_eq!(w.max(), Some(3.0));
        assert_eq!(w.count(), 4);
    }

    #[test]
    fn summary_needs_two_values_for_interval() {
        let mut s = SummaryStatistic::new();
        s.ingest(13.0);
        assert!(s.confidence_interval(0.95).is_none());
        s.ingest(13.0);
        let ci = s.confidence_interval(0.95).unwrap();
        assert_eq!(ci.lower, 13.0);
        assert_eq!(ci.upper, 13.0);
    }

    #[test]
    fn summary_interval_is_symmetric() {
        let mut s = SummaryStatistic::new();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            s.ingest(v);
        }
        let ci = s.confidence_interval(0.95).unwrap();
        let expected = 1.959_963_985 * s.std_dev().unwrap() / 5f64.sqrt();
        assert!((ci.half_width - expected).abs() < 1e-6);
        assert!(close(ci.lower + ci.upper, 6.0));
        assert!(s.confidence_interval(1.0).is_none());
        assert!(s.confidence_interval(0.0).is_none());
    }

    #[test]
    fn inverse_normal_reference_points() {
        assert!(inverse_normal_cdf(0.5).abs() < 1e-12);
        assert!((inverse_normal_cdf(0.975) - 1.959_963_985).abs() < 1e-6);
        assert!((inverse_normal_cdf(0.01) + 2.326_347_874).abs() < 1e-6);
        assert!(inverse_normal_cdf(0.0).is_nan());
        assert!(inverse_normal_cdf(1.5).is_nan());
    }

    proptest! {
        #[test]
        fn welford_matches_two_pass(values in prop::collection::vec(-1e6f64..1e6, 2..64)) {
            let mut s = RunningStats::new();
            for &v in &values {
                s.ingest(v);
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            prop_assert!((s.mean().unwrap() - mean).abs() <= 1e-6 * (1.0 + mean.abs()));
            prop_assert!((s.variance().unwrap() - var).abs() <= 1e-6 * (1.0 + var));
        }

        #[test]
        fn weighted_matches_two_pass(
            samples in prop::collection::vec((-1e3f64..1e3, 0.01f64..100.0), 1..64)
        ) {
            let mut w = WeightedStats::new();
            for &(v, wt) in &samples {
                w.ingest(v, wt);
            }
            let total: f64 = samples.iter().map(|s| s.1).sum();
            let mean = samples.iter().map(|s| s.0 * s.1).sum::<f64>() / total;
            let var = samples.iter().map(|s| s.1 * (s.0 - mean).powi(2)).sum::<f64>() / total;
            prop_assert!((w.mean().unwrap() - mean).abs() <= 1e-6 * (1.0 + mean.abs()));
            prop_assert!((w.variance().unwrap() - var).abs() <= 1e-6 * (1.0 + var));
        }
    }
}
