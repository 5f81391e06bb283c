//! Window and partition planning benchmarks.
//!
//! Run with: cargo bench --bench planning_bench

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use strata_core::partition::parse_partition_bound;
use strata_core::{DependencyHeight, HealthSnapshot, PartitionLayout, RatePolicy, WindowPlan};

fn bench_window_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_resolve");
    for deps in [1_usize, 8, 64] {
        let plan = WindowPlan {
            start: 1_000_000,
            batch_size: Some(500),
            dependencies: (0..deps)
                .map(|i| {
                    if i % 7 == 3 {
                        DependencyHeight::Missing
                    } else {
                        DependencyHeight::At(2_000_000 + i64::try_from(i).unwrap_or(0))
                    }
                })
                .collect(),
            bootstrap_floor: Some(1_500_000),
        };
        group.bench_with_input(BenchmarkId::from_parameter(deps), &plan, |b, plan| {
            b.iter(|| black_box(plan.resolve("bench-job")));
        });
    }
    group.finish();
}

fn bench_partition_covering(c: &mut Criterion) {
    let layout = PartitionLayout::new(100_000).unwrap();
    let mut group = c.benchmark_group("partition_covering");
    for span in [100_000_i64, 10_000_000, 1_000_000_000] {
        group.throughput(Throughput::Elements(
            u64::try_from(span / layout.step()).unwrap_or(0),
        ));
        group.bench_with_input(BenchmarkId::from_parameter(span), &span, |b, &span| {
            b.iter(|| black_box(layout.covering("event", 1, span)));
        });
    }
    group.finish();
}

fn bench_next_partition_due(c: &mut Criterion) {
    let layout = PartitionLayout::new(1_000).unwrap();
    c.bench_function("next_partition_due", |b| {
        let mut id = 0_i64;
        b.iter(|| {
            id = (id + 137) % 10_000_000;
            black_box(layout.next_partition_due("event", id))
        });
    });
}

fn bench_parse_bound(c: &mut Criterion) {
    c.bench_function("parse_partition_bound", |b| {
        b.iter(|| black_box(parse_partition_bound("FOR VALUES FROM ('1000000') TO ('1100000')")));
    });
}

fn bench_rate_plan(c: &mut Criterion) {
    let policy = RatePolicy::default();
    c.bench_function("rate_plan", |b| {
        b.iter(|| {
            black_box(policy.plan(&HealthSnapshot {
                load: 0.6,
                fresh_start: false,
            }))
        });
    });
}

criterion_group!(
    benches,
    bench_window_resolve,
    bench_partition_covering,
    bench_next_partition_due,
    bench_parse_bound,
    bench_rate_plan
);
criterion_main!(benches);
