//! Pipeline throughput benchmarks
//!
//! Measures the per-item cost of the synchronous drain paths:
//! - bench_range_operators: range -> map -> filter
//! - bench_emitter: buffered emitter under unbounded demand
//! - bench_concat: sequential hand-off between sources
//! - bench_uni_chain: Uni resolution through a few stages
//!
//! Run with: cargo bench --bench pipeline_bench

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rivulet_core::{BackpressureStrategy, EmitterConfig, Multi, Uni};

fn drain(multi: &Multi<i64>) -> u64 {
    let sum = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&sum);
    multi.subscribe_with(move |n| {
        sink.fetch_add(n.unsigned_abs(), Ordering::Relaxed);
    });
    sum.load(Ordering::Relaxed)
}

fn bench_range_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_operators");

    for size in [1_000i64, 100_000] {
        let pipeline = Multi::range(0, size).map(|n| n * 2).filter(|n| n % 3 == 0);

        group.throughput(Throughput::Elements(size.unsigned_abs()));
        group.bench_with_input(BenchmarkId::new("map_filter", size), &pipeline, |b, p| {
            b.iter(|| black_box(drain(p)));
        });
    }

    group.finish();
}

fn bench_emitter(c: &mut Criterion) {
    let mut group = c.benchmark_group("emitter");

    for strategy in [BackpressureStrategy::Buffer, BackpressureStrategy::Drop] {
        let pipeline = Multi::emitter_with_config(EmitterConfig::with_strategy(strategy), |e| {
            for i in 0..10_000 {
                e.emit(i);
            }
            e.complete();
        });

        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(
            BenchmarkId::new("emit", format!("{strategy:?}")),
            &pipeline,
            |b, p| b.iter(|| black_box(drain(p))),
        );
    }

    group.finish();
}

fn bench_concat(c: &mut Criterion) {
    let mut group = c.benchmark_group("concat");

    let pipeline = Multi::range(0, 5_000)
        .on_completion()
        .continue_with(0..5_000);
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("continue_with", |b| b.iter(|| black_box(drain(&pipeline))));

    let sources: Vec<_> = (0..100).map(|i| Multi::range(i * 100, (i + 1) * 100)).collect();
    let pipeline = Multi::concat(sources);
    group.bench_function("hundred_sources", |b| b.iter(|| black_box(drain(&pipeline))));

    group.finish();
}

fn bench_uni_chain(c: &mut Criterion) {
    let pipeline = Uni::item(21_i64)
        .map(|n| n * 2)
        .on_item()
        .transform(|n| n + 1)
        .to_multi();

    c.bench_function("uni_chain", |b| b.iter(|| black_box(drain(&pipeline))));
}

criterion_group!(
    benches,
    bench_range_operators,
    bench_emitter,
    bench_concat,
    bench_uni_chain
);
criterion_main!(benches);
