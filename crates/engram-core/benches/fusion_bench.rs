//! Benchmarks for score fusion and clustering.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use engram_core::graph::kmeans_cosine;
use engram_core::search::linear_combination;

fn bench_fusion(c: &mut Criterion) {
    let keyword: Vec<(String, f32)> = (0..100)
        .map(|i| (format!("t_{i}"), 1.0 / (i + 1) as f32))
        .collect();
    let semantic: Vec<(String, f32)> = (0..50)
        .map(|i| (format!("t_{}", i * 2), 1.0 / (i + 1) as f32))
        .collect();

    c.bench_function("linear_combination_100x50", |b| {
        b.iter(|| linear_combination(black_box(&keyword), black_box(&semantic), 0.3, 0.7))
    });
}

fn bench_kmeans(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1234);
    let vectors: Vec<Vec<f32>> = (0..200)
        .map(|_| (0..256).map(|_| rng.gen::<f32>() - 0.5).collect())
        .collect();

    c.bench_function("kmeans_cosine_200x256_k5", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(42);
            kmeans_cosine(black_box(&vectors), 5, &mut rng)
        })
    });
}

criterion_group!(benches, bench_fusion, bench_kmeans);
criterion_main!(benches);
