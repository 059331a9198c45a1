//! Worker pool: pulls sealed batches in FIFO order, calls the backend once
//! per batch and fans results or the failure back to every member.

use super::admission::AdmissionGate;
use super::collector::Batch;
use super::request::{RequestState, SlotRegistry};
use super::stats::StatsAggregator;
use crate::embeddings::{EmbeddingOutput, EmbeddingVectors, InferenceBackend};
use crate::Error;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// Shared receiving end of the dispatch queue. Workers take turns holding
/// the lock while waiting, which keeps dispatch strictly FIFO.
pub(crate) type DispatchQueue = Arc<Mutex<mpsc::UnboundedReceiver<Batch>>>;

/// Everything a worker touches besides the batch itself.
pub(crate) struct WorkerContext {
    pub(crate) backend: Arc<dyn InferenceBackend>,
    pub(crate) stats: Arc<StatsAggregator>,
    pub(crate) gate: Arc<AdmissionGate>,
    pub(crate) registry: Arc<SlotRegistry>,
}

pub(crate) async fn run_worker(worker_id: usize, queue: DispatchQueue, ctx: Arc<WorkerContext>) {
    tracing::debug!(worker_id, "Worker started");
    loop {
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(batch) = next else {
            break;
        };
        process_batch(worker_id, batch, &ctx).await;
    }
    tracing::debug!(worker_id, "Worker stopped: dispatch queue closed");
}

/// Runs one batch to completion. Never panics outward: backend errors and
/// backend panics both become an `InferenceFailure` for every member.
pub(crate) async fn process_batch(worker_id: usize, batch: Batch, ctx: &WorkerContext) {
    for r in &batch.requests {
        r.slot.advance(RequestState::Processing);
    }
    ctx.gate.release(batch.len());

    let in_flight = ctx.stats.batch_started();
    let texts = batch.texts();
    let flags = batch.flags();
    tracing::debug!(
        worker_id,
        batch_seq = batch.seq(),
        batch_size = batch.len(),
        flags = %flags,
        in_flight,
        backend = ctx.backend.name(),
        "Processing batch"
    );

    let started = Instant::now();
    let result = AssertUnwindSafe(ctx.backend.infer(&texts, flags))
        .catch_unwind()
        .await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    ctx.stats.batch_finished();

    let outcome = match result {
        Ok(Ok(vectors)) if vectors.len() == batch.len() => Ok(vectors),
        Ok(Ok(vectors)) => Err(Error::inference(format!(
            "backend returned {} results for {} inputs",
            vectors.len(),
            batch.len()
        ))),
        Ok(Err(e)) => Err(Error::inference(e.to_string())),
        Err(_) => Err(Error::inference("inference backend panicked")),
    };

    match outcome {
        Ok(vectors) => {
            fan_out_success(&batch, vectors, ctx);
            ctx.stats.record_batch(batch.len(), elapsed_ms);
            tracing::info!(
                worker_id,
                batch_seq = batch.seq(),
                batch_size = batch.len(),
                duration_ms = elapsed_ms,
                "Batch processed"
            );
        }
        Err(err) => {
            tracing::error!(
                worker_id,
                batch_seq = batch.seq(),
                batch_size = batch.len(),
                duration_ms = elapsed_ms,
                error = %err,
                "Batch failed"
            );
            fan_out_failure(&batch, err, ctx);
            ctx.stats.record_failure(elapsed_ms);
        }
    }
}

fn fan_out_success(batch: &Batch, vectors: Vec<EmbeddingVectors>, ctx: &WorkerContext) {
    for (req, v) in batch.requests.iter().zip(vectors) {
        let output = EmbeddingOutput::from_batch_item(&req.text, v, req.flags);
        if !req.slot.resolve(Ok(output)) {
            tracing::debug!(request_id = %req.id, "Result slot already resolved");
        }
        ctx.registry.remove(req.id);
    }
}

fn fan_out_failure(batch: &Batch, err: Error, ctx: &WorkerContext) {
    for req in &batch.requests {
        req.slot.resolve(Err(err.clone()));
        ctx.registry.remove(req.id);
    }
}
