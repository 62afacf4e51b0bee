//! Saga benchmark suite.
//!
//! Targets on a developer laptop:
//!   rank_top5_from_500 ............. < 200μs
//!   query_relevant_top5_from_200 ... < 1ms (warm index)
//!   apply_batch_10_deltas .......... < 5ms (includes atomic writes)

use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use saga_core::embedding::HashingEmbeddingProvider;
use saga_core::retrieval::{self, Candidate};
use saga_core::{CharacterId, MemoryDelta, MemoryStore, Moment, PlotId, RecordRef, SagaConfig};

const TRADES: [&str; 5] = ["detective", "smuggler", "harbor master", "informant", "clerk"];

fn open_store(dir: &std::path::Path) -> MemoryStore {
    let mut config = SagaConfig::default();
    config.memory.data_dir = dir.to_path_buf();
    MemoryStore::open(&config, Arc::new(HashingEmbeddingProvider::default())).expect("open store")
}

fn seed_deltas(n: usize) -> Vec<MemoryDelta> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                MemoryDelta::create_character(
                    format!("Character {i}"),
                    format!("A {} working the docks", TRADES[i % TRADES.len()]),
                )
            } else {
                MemoryDelta::create_plot(format!("Thread {i}: who moved the {} ledger?", TRADES[i % TRADES.len()]))
            }
        })
        .collect()
}

/// Benchmark: pure ranking over 500 precomputed embeddings.
fn bench_rank(c: &mut Criterion) {
    let embedder = HashingEmbeddingProvider::default();
    let embeddings: Vec<_> = (0..500)
        .map(|i| embedder.embed_text(&format!("record {i} about the {} at the harbor", TRADES[i % 5])))
        .collect();
    let query = embedder.embed_text("the smuggler at the harbor");

    c.bench_function("rank_top5_from_500", |b| {
        b.iter(|| {
            let candidates = embeddings.iter().enumerate().map(|(i, e)| Candidate {
                reference: if i % 2 == 0 {
                    RecordRef::Character(CharacterId(i as u64))
                } else {
                    RecordRef::Plot(PlotId(i as u64))
                },
                revision: i as u64,
                embedding: e,
            });
            black_box(retrieval::rank(black_box(&query), candidates, 5));
        });
    });
}

/// Benchmark: store-level retrieval with a warm index.
fn bench_query_relevant(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = open_store(dir.path());
    store.apply_batch(&seed_deltas(200), Moment::Planning).expect("seed");
    rt.block_on(store.rebuild_index()).expect("warm index");

    c.bench_function("query_relevant_top5_from_200", |b| {
        b.iter(|| {
            let hits = rt
                .block_on(store.query_relevant(black_box("the informant hides the ledger"), 5))
                .expect("query");
            black_box(hits);
        });
    });
}

/// Benchmark: one episode-sized commit against a fresh store.
fn bench_apply_batch(c: &mut Criterion) {
    let deltas = seed_deltas(10);
    c.bench_function("apply_batch_10_deltas", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().expect("tempdir");
                let store = open_store(dir.path());
                (dir, store)
            },
            |(dir, mut store)| {
                black_box(store.apply_batch(black_box(&deltas), Moment::Episode(0)).expect("apply"));
                drop(store);
                drop(dir);
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, bench_rank, bench_query_relevant, bench_apply_batch);
criterion_main!(benches);
