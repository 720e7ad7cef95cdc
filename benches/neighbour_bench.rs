use criterion::{black_box, criterion_group, criterion_main, Criterion};

use knnbot::config::{FeatureConfig, GridConfig, KnnConfig};
use knnbot::features::{FeatureExtractor, FeatureVector};
use knnbot::neighbours::GridIndex;
use knnbot::types::{Candle, CandleSeries};

fn make_candles(n: usize) -> CandleSeries {
    let base_ts: i64 = 1672531200;
    let candles = (0..n)
        .map(|i| {
            let ts = base_ts + (i as i64) * 60;
            let trend = (i as f64) * 0.001;
            let noise = ((i as f64) * 0.37).sin() * 0.8;
            let open = 100.0 + trend + noise;
            let close = open + ((i as f64) * 0.11).cos() * 0.5;
            Candle::new(ts, open, open.max(close) + 0.05, open.min(close) - 0.05, close, 1000.0)
        })
        .collect();
    CandleSeries::new(candles).expect("synthetic candles are valid")
}

fn build(n: usize) -> (GridIndex, Vec<FeatureVector>) {
    let candles = make_candles(n);
    let extractor = FeatureExtractor::new(&FeatureConfig::default()).expect("default features");
    let vectors = extractor.extract(candles.as_slice()).expect("features");
    let grid = GridConfig {
        bucket_widths: vec![0.1],
        ..Default::default()
    };
    let index = GridIndex::from_config(&vectors, extractor.dimensions(), &grid, &KnnConfig::default())
        .expect("index");
    let queries = vectors.into_iter().flatten().step_by(97).take(100).collect();
    (index, queries)
}

fn bench_grid_query(c: &mut Criterion) {
    let (index, queries) = build(50_000);
    c.bench_function("grid_query_50k", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(index.query(black_box(q.as_slice()), 5).ok());
            }
        });
    });
}

fn bench_exhaustive_query(c: &mut Criterion) {
    let (index, queries) = build(50_000);
    c.bench_function("exhaustive_query_50k", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(index.query_exhaustive(black_box(q.as_slice()), 5).ok());
            }
        });
    });
}

criterion_group!(benches, bench_grid_query, bench_exhaustive_query);
criterion_main!(benches);
