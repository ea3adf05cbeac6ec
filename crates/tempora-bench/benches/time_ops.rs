//! Criterion micro-benchmarks for simulated-time arithmetic.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use tempora_core::{SimTime, TimeUnit, UnitDuration, UnitTime};

/// Benchmark: 10K in-place advances of an `f64` instant.
fn bench_advance_f64_10k(c: &mut Criterion) {
    c.bench_function("advance_f64_10k", |b| {
        b.iter(|| {
            let mut t = SimTime::new(0.0f64);
            for _ in 0..10_000 {
                t.add(black_box(0.5));
            }
            black_box(t)
        });
    });
}

/// Benchmark: 10K in-place advances of an `i64` instant.
fn bench_advance_i64_10k(c: &mut Criterion) {
    c.bench_function("advance_i64_10k", |b| {
        b.iter(|| {
            let mut t = SimTime::new(0i64);
            for _ in 0..10_000 {
                t.add(black_box(3));
            }
            black_box(t)
        });
    });
}

/// Benchmark: advance a seconds-based instant by minute durations, which
/// converts units on every step.
fn bench_advance_unit_mixed_10k(c: &mut Criterion) {
    let step = UnitDuration::new(0.25f64, TimeUnit::Minute);
    c.bench_function("advance_unit_mixed_10k", |b| {
        b.iter(|| {
            let mut t = SimTime::new(UnitTime::new(0.0f64, TimeUnit::Second));
            for _ in 0..10_000 {
                t.add(black_box(step));
            }
            black_box(t)
        });
    });
}

/// Benchmark: compare and diff 1000 deterministic pairs across units.
fn bench_compare_unit_pairs(c: &mut Criterion) {
    let pairs: Vec<(SimTime<UnitTime<f64>>, SimTime<UnitTime<f64>>)> = (0u64..1000)
        .map(|i| {
            let a = (i.wrapping_mul(6364136223846793007) % 10_000) as f64;
            let b = (i.wrapping_mul(1442695040888963407) % 10_000) as f64;
            (
                SimTime::new(UnitTime::new(a, TimeUnit::Second)),
                SimTime::new(UnitTime::new(b / 60.0, TimeUnit::Minute)),
            )
        })
        .collect();

    c.bench_function("compare_unit_pairs_1k", |b| {
        b.iter(|| {
            let mut later = 0u32;
            for (x, y) in &pairs {
                if x > y {
                    later += 1;
                }
                black_box(x.diff(y));
            }
            black_box(later)
        });
    });
}

criterion_group!(
    benches,
    bench_advance_f64_10k,
    bench_advance_i64_10k,
    bench_advance_unit_mixed_10k,
    bench_compare_unit_pairs
);
criterion_main!(benches);
