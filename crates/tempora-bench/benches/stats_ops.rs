//! Criterion micro-benchmarks for accumulators, the event registry and
//! bound statistics.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use parking_lot::Mutex;
use tempora_core::{EventBus, RunningStats, SummaryStatistic, WeightedStats};
use tempora_engine::{Replication, RunControl};
use tempora_stats::{Persistent, Tally};
use tempora_test_utils::{event_list_simulator, ScriptedModel};

/// Deterministic pseudo-random values in [0, 100).
fn values(n: u64) -> Vec<f64> {
    (0..n)
        .map(|i| (i.wrapping_mul(6364136223846793007) % 10_000) as f64 / 100.0)
        .collect()
}

/// Benchmark: ingest 10K values into a RunningStats.
fn bench_running_stats_10k(c: &mut Criterion) {
    let data = values(10_000);
    c.bench_function("running_stats_10k", |b| {
        b.iter(|| {
            let mut s = RunningStats::new();
            for &v in &data {
                s.ingest(v);
            }
            black_box(s.variance())
        });
    });
}

/// Benchmark: ingest 10K weighted values into a WeightedStats.
fn bench_weighted_stats_10k(c: &mut Criterion) {
    let data = values(10_000);
    c.bench_function("weighted_stats_10k", |b| {
        b.iter(|| {
            let mut s = WeightedStats::new();
            for (i, &v) in data.iter().enumerate() {
                s.ingest(v, (i % 7) as f64 * 0.25);
            }
            black_box(s.mean())
        });
    });
}

/// Benchmark: 95% confidence interval over 1000 replication means.
fn bench_summary_interval(c: &mut Criterion) {
    let mut summary = SummaryStatistic::new();
    for v in values(1000) {
        summary.ingest(v);
    }
    c.bench_function("summary_interval_1k", |b| {
        b.iter(|| black_box(summary.confidence_interval(black_box(0.95))));
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Probe {
    Sample,
}

/// Benchmark: publish 10K events to 8 subscribers.
fn bench_event_bus_publish_10k(c: &mut Criterion) {
    let bus: EventBus<Probe, f64> = EventBus::new();
    let hits = Arc::new(AtomicU64::new(0));
    for _ in 0..8 {
        let hits = Arc::clone(&hits);
        bus.subscribe(Probe::Sample, move |_: &f64| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
    }
    c.bench_function("event_bus_publish_10k", |b| {
        b.iter(|| {
            for i in 0..10_000 {
                bus.publish(Probe::Sample, &black_box(i as f64));
            }
        });
    });
    black_box(hits.load(Ordering::Relaxed));
}

/// Benchmark: ingest 10K values into a bound Tally and Persistent.
fn bench_bound_statistics_10k(c: &mut Criterion) {
    let sim = event_list_simulator();
    let slot: Arc<Mutex<Option<(Tally<f64>, Persistent<f64>)>>> = Arc::default();
    let captured = Arc::clone(&slot);
    let mut model = ScriptedModel::<f64>::new(move |ctx, _| {
        let tally = Tally::new("bench_tally", ctx.simulator())
            .map_err(|e| tempora_core::PropagationError::failed("bench", e.to_string()))?;
        let level = Persistent::new("bench_level", ctx.simulator())
            .map_err(|e| tempora_core::PropagationError::failed("bench", e.to_string()))?;
        *captured.lock() = Some((tally, level));
        Ok(())
    });
    let treatment = RunControl::new("bench", 0.0, 0.0, 1.0).unwrap();
    sim.initialize(Replication::new("bench", treatment).unwrap(), &mut model)
        .unwrap();
    let (tally, level) = slot.lock().take().unwrap();
    let data = values(10_000);

    c.bench_function("bound_statistics_10k", |b| {
        b.iter(|| {
            for &v in &data {
                tally.ingest(v);
                level.ingest(v);
            }
            black_box(tally.mean())
        });
    });
}

criterion_group!(
    benches,
    bench_running_stats_10k,
    bench_weighted_stats_10k,
    bench_summary_interval,
    bench_event_bus_publish_10k,
    bench_bound_statistics_10k
);
criterion_main!(benches);
