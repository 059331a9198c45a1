//! Benchmarks for batching overhead
//!
//! This benchmark measures:
//! - Submit-to-result latency through full batches against a no-op backend
//! - Per-member result selection after a union-flag backend call

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use embed_batcher::batch::{BatcherConfig, EmbeddingBatcher};
use embed_batcher::embeddings::{
    BackendError, EmbeddingOutput, EmbeddingVectors, InferenceBackend, OutputFlags,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

struct NoopBackend;

#[async_trait]
impl InferenceBackend for NoopBackend {
    async fn infer(
        &self,
        texts: &[String],
        flags: OutputFlags,
    ) -> Result<Vec<EmbeddingVectors>, BackendError> {
        Ok(texts.iter().map(|_| full_vectors().select(flags)).collect())
    }
}

fn full_vectors() -> EmbeddingVectors {
    EmbeddingVectors::default()
        .with_dense(vec![0.1; 384])
        .with_sparse((0..32).map(|i| (i, 0.5)).collect())
        .with_colbert(vec![vec![0.2; 128]; 16])
}

fn bench_submit_and_wait(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("submit_and_wait");

    for batch_size in [1usize, 8, 32] {
        let config = BatcherConfig::default()
            .with_batch_size(batch_size)
            .with_batch_timeout(Duration::from_millis(5))
            .with_processing_concurrency(2)
            .with_max_queue_size(1024);
        let batcher = {
            let _guard = rt.enter();
            Arc::new(EmbeddingBatcher::new(config, Arc::new(NoopBackend)).unwrap())
        };
        let requests = 256;
        group.throughput(Throughput::Elements(requests as u64));

        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batcher, |b, batcher| {
            b.to_async(&rt).iter(|| async {
                let calls = (0..requests).map(|i| {
                    batcher.embed(format!("benchmark text {i}"), OutputFlags::dense_only())
                });
                for r in join_all(calls).await {
                    black_box(r.unwrap());
                }
            })
        });

        rt.block_on(batcher.shutdown());
    }
    group.finish();
}

fn bench_result_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_selection");
    let vectors = full_vectors();

    for (name, flags) in [
        ("dense", OutputFlags::dense_only()),
        ("sparse", OutputFlags::sparse_only()),
        ("all", OutputFlags::ALL),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                EmbeddingOutput::from_batch_item(
                    black_box("the quick brown fox"),
                    vectors.clone(),
                    black_box(flags),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_submit_and_wait, bench_result_selection);
criterion_main!(benches);
