//! Statistics pass benchmarks
//!
//! Measures one collector invocation over models of growing size, and the
//! individual reductions it is built from.
//!
//! Run with: cargo bench --bench statistics

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use trueno_monitor::model::Parameter;
use trueno_monitor::sink::MemorySink;
use trueno_monitor::statistics::ParameterStatistics;
use trueno_monitor::stats::{self, Statistic};

const SIZES: [usize; 3] = [1_000, 100_000, 1_000_000];

fn random(n: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Benchmark the single-array reductions
fn bench_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("reductions_f32");

    for size in SIZES {
        let data = random(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("sum_kahan", size), &data, |b, d| {
            b.iter(|| stats::sum(black_box(d)));
        });
        group.bench_with_input(BenchmarkId::new("mean", size), &data, |b, d| {
            b.iter(|| stats::mean(black_box(d)));
        });
        group.bench_with_input(BenchmarkId::new("std", size), &data, |b, d| {
            b.iter(|| stats::std(black_box(d)));
        });
        group.bench_with_input(BenchmarkId::new("l2_norm", size), &data, |b, d| {
            b.iter(|| stats::l2_norm(black_box(d)));
        });
        group.bench_with_input(BenchmarkId::new("percentiles", size), &data, |b, d| {
            b.iter(|| stats::percentiles(black_box(d), &stats::SIGMA_PERCENTILES));
        });
    }

    group.finish();
}

/// Benchmark one collector pass over a model with gradients
fn bench_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");

    for size in SIZES {
        // Four layers of equal size, all with gradients
        let model: Vec<Parameter> = (0..4)
            .map(|i| {
                Parameter::from_vec(format!("l{i}_W"), random(size / 4))
                    .and_then(|p| p.with_grad(random(size / 4)))
                    .expect("valid parameter")
            })
            .collect();

        let defaults = ParameterStatistics::builder()
            .sink(Arc::new(MemorySink::new()))
            .build(&model)
            .expect("valid model");
        let extended = ParameterStatistics::builder()
            .sink(Arc::new(MemorySink::new()))
            .value_statistics(vec![Statistic::Mean, Statistic::Std, Statistic::Zeros, Statistic::Percentile])
            .build(&model)
            .expect("valid model");

        group.throughput(Throughput::Elements(size as u64 * 2));
        group.bench_with_input(BenchmarkId::new("defaults", size), &model, |b, m| {
            b.iter(|| defaults.collect(black_box(m), 1));
        });
        group.bench_with_input(BenchmarkId::new("with_percentiles", size), &model, |b, m| {
            b.iter(|| extended.collect(black_box(m), 1));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reductions, bench_collect);
criterion_main!(benches);
