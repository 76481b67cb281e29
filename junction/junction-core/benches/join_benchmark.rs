use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use datafusion::arrow::array::{ArrayRef, Int64Array, RecordBatch};
use rand::prelude::*;

use junction_core::{join, JoinAlgorithm, JoinKeySpec, JoinKind, JoinSpec, Sortedness, Table};

fn generate_sorted_table(rows: usize, key_range: i64, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keys: Vec<i64> = (0..rows).map(|_| rng.gen_range(0..key_range)).collect();
    keys.sort_unstable();
    let payload: Vec<i64> = (0..rows as i64).collect();
    let batch = RecordBatch::try_from_iter(vec![
        ("k", Arc::new(Int64Array::from(keys)) as ArrayRef),
        ("p", Arc::new(Int64Array::from(payload)) as ArrayRef),
    ])
    .unwrap();
    Table::try_from_batch(batch)
        .unwrap()
        .with_sorted("k", Sortedness::Ascending)
        .unwrap()
}

fn benchmark_hash_vs_merge(c: &mut Criterion) {
    let sizes = vec![50_000, 100_000];

    let mut group = c.benchmark_group("hash_vs_merge_inner_join");
    group.sample_size(10);

    for &size in &sizes {
        let left = generate_sorted_table(size, size as i64, 12345);
        let right = generate_sorted_table(size, size as i64, 54321);

        group.bench_function(format!("hash_{}k", size / 1000), |b| {
            let spec = JoinSpec::new(JoinKind::Inner, JoinKeySpec::on(["k"]))
                .with_algorithm(JoinAlgorithm::Hash);
            b.iter(|| {
                let out = join(black_box(&left), black_box(&right), &spec).unwrap();
                black_box(out.num_rows());
            });
        });

        group.bench_function(format!("merge_{}k", size / 1000), |b| {
            let spec = JoinSpec::new(JoinKind::Inner, JoinKeySpec::on(["k"]))
                .with_algorithm(JoinAlgorithm::SortMerge);
            b.iter(|| {
                let out = join(black_box(&left), black_box(&right), &spec).unwrap();
                black_box(out.num_rows());
            });
        });
    }

    group.finish();
}

fn benchmark_asof_backward(c: &mut Criterion) {
    let left = generate_sorted_table(100_000, 1_000_000, 11111);
    let right = generate_sorted_table(100_000, 1_000_000, 22222);

    let mut group = c.benchmark_group("asof_backward");
    group.sample_size(10);

    group.bench_function("asof_100k_x_100k", |b| {
        let spec = JoinSpec::new(JoinKind::Asof, JoinKeySpec::on(["k"]));
        b.iter(|| {
            let out = join(black_box(&left), black_box(&right), &spec).unwrap();
            black_box(out.num_rows());
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_hash_vs_merge, benchmark_asof_backward);
criterion_main!(benches);
