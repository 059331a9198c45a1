//! The batcher: admission, the batch-forming task, the worker pool and the
//! shutdown drain.

use super::admission::AdmissionGate;
use super::collector::{Batch, BatchCollector, SealTrigger};
use super::config::BatcherConfig;
use super::executor::{run_worker, DispatchQueue, WorkerContext};
use super::request::{PendingRequest, RequestHandle, ResultSlot, SlotRegistry};
use super::stats::{StatsAggregator, StatsSnapshot};
use crate::embeddings::{EmbeddingOutput, InferenceBackend, OutputFlags};
use crate::{Error, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of [`EmbeddingBatcher::shutdown`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// All admitted work finished before the drain deadline.
    pub drained: bool,
    /// Requests force-resolved with `ShutdownTimeout`.
    pub timed_out_requests: usize,
    pub elapsed_ms: u64,
}

struct Tasks {
    former: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Adaptive micro-batching scheduler in front of an [`InferenceBackend`].
///
/// ```text
/// submit ─► AdmissionGate ─► intake ─► batch former ─► dispatch ─► workers ─► backend
///              (QueueFull)              (size / timeout)   (FIFO)     (K at once)
/// ```
///
/// Must be created inside a tokio runtime; construction spawns one forming
/// task and `processing_concurrency` workers.
pub struct EmbeddingBatcher {
    config: BatcherConfig,
    gate: Arc<AdmissionGate>,
    registry: Arc<SlotRegistry>,
    stats: Arc<StatsAggregator>,
    intake: mpsc::UnboundedSender<PendingRequest>,
    shutdown: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
    report: OnceCell<ShutdownReport>,
}

impl EmbeddingBatcher {
    /// Validates `config` and starts the scheduler. Configuration errors are
    /// returned before anything is spawned.
    pub fn new(config: BatcherConfig, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;

        let gate = Arc::new(AdmissionGate::new(config.max_queue_size));
        let registry = Arc::new(SlotRegistry::default());
        let stats = Arc::new(StatsAggregator::new());
        let shutdown = CancellationToken::new();

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let former = tokio::spawn(run_former(
            intake_rx,
            dispatch_tx,
            Arc::clone(&registry),
            config.batch_size,
            config.batch_timeout,
            shutdown.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            backend,
            stats: Arc::clone(&stats),
            gate: Arc::clone(&gate),
            registry: Arc::clone(&registry),
        });
        let queue: DispatchQueue = Arc::new(Mutex::new(dispatch_rx));
        let workers = (0..config.processing_concurrency)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&queue), Arc::clone(&ctx))))
            .collect();

        tracing::info!(
            batch_size = config.batch_size,
            batch_timeout_ms = config.batch_timeout.as_millis() as u64,
            processing_concurrency = config.processing_concurrency,
            max_queue_size = config.max_queue_size,
            "Embedding batcher started"
        );

        Ok(Self {
            config,
            gate,
            registry,
            stats,
            intake: intake_tx,
            shutdown,
            tasks: Mutex::new(Some(Tasks { former, workers })),
            report: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Admits one request or rejects it immediately.
    ///
    /// The caller must already have validated `text` and `flags`.
    /// Rejections (`QueueFull`, `ServiceUnavailable`) create no request.
    pub fn submit(&self, text: impl Into<String>, flags: OutputFlags) -> Result<RequestHandle> {
        if self.intake.is_closed() {
            // The forming task stopped on its own; admission follows it.
            self.gate.begin_draining();
        }
        let id = self.gate.try_admit().map_err(|e| {
            tracing::warn!(
                error = %e,
                queue_depth = self.gate.depth(),
                max_queue_size = self.gate.capacity(),
                "Request rejected at admission"
            );
            e
        })?;

        let (slot, rx) = ResultSlot::new(id);
        self.registry.insert(Arc::clone(&slot));
        let req = PendingRequest::new(text.into(), flags, Arc::clone(&slot));

        if self.intake.send(req).is_err() {
            // Intake closed between the check above and the send. The slot
            // never reached the caller, so undo the admission entirely.
            self.gate.release(1);
            self.registry.remove(id);
            self.gate.begin_draining();
            return Err(Error::ServiceUnavailable);
        }

        tracing::trace!(request_id = %id, flags = %flags, "Request queued");
        Ok(RequestHandle::new(slot, rx))
    }

    /// Waits for an admitted request's result.
    pub async fn await_result(&self, handle: RequestHandle) -> Result<EmbeddingOutput> {
        handle.wait().await
    }

    /// `submit` followed by `await_result`.
    pub async fn embed(
        &self,
        text: impl Into<String>,
        flags: OutputFlags,
    ) -> Result<EmbeddingOutput> {
        self.submit(text, flags)?.wait().await
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.gate.depth(), self.gate.rejected())
    }

    /// Stops admission and flushes the forming group without waiting for its
    /// timer. Already admitted work keeps running.
    pub fn begin_shutdown(&self) {
        if self.gate.begin_draining() {
            tracing::info!(
                queue_depth = self.gate.depth(),
                unresolved = self.registry.len(),
                in_flight_batches = self.stats.in_flight(),
                "Shutdown requested; draining"
            );
        }
        self.shutdown.cancel();
    }

    pub fn is_draining(&self) -> bool {
        self.gate.is_draining()
    }

    /// Drains and tears down the scheduler.
    ///
    /// Waits up to `drain_timeout` for every admitted request to resolve.
    /// Whatever is still unresolved then fails with `ShutdownTimeout` and the
    /// workers are aborted. Concurrent and later callers wait for the same
    /// drain and receive the same report.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.begin_shutdown();
        self.report.get_or_init(|| self.drain()).await.clone()
    }

    async fn drain(&self) -> ShutdownReport {
        let started = Instant::now();

        let Some(tasks) = self.tasks.lock().await.take() else {
            return ShutdownReport {
                drained: true,
                timed_out_requests: 0,
                elapsed_ms: 0,
            };
        };
        let Tasks { former, workers } = tasks;
        let aborts: Vec<_> = std::iter::once(former.abort_handle())
            .chain(workers.iter().map(|w| w.abort_handle()))
            .collect();

        let drain = async move {
            let _ = former.await;
            join_all(workers).await;
        };
        let drained = tokio::time::timeout(self.config.drain_timeout, drain)
            .await
            .is_ok();

        let mut timed_out = 0;
        if !drained {
            for handle in &aborts {
                handle.abort();
            }
            // Aborted workers never report their batch as finished.
            self.stats.reset_in_flight();
            let waited_ms = started.elapsed().as_millis() as u64;
            for slot in self.registry.take_all() {
                if slot.resolve(Err(Error::ShutdownTimeout { waited_ms })) {
                    timed_out += 1;
                }
            }
            tracing::warn!(
                timed_out_requests = timed_out,
                drain_timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "Drain deadline elapsed; unresolved requests failed"
            );
        } else {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batcher drained"
            );
        }

        ShutdownReport {
            drained,
            timed_out_requests: timed_out,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl Drop for EmbeddingBatcher {
    fn drop(&mut self) {
        self.gate.begin_draining();
        self.shutdown.cancel();
    }
}

/// The single batch-forming task. Owns the collector; seals on size, on the
/// age timer, and once more on shutdown.
async fn run_former(
    mut intake: mpsc::UnboundedReceiver<PendingRequest>,
    dispatch: mpsc::UnboundedSender<Batch>,
    registry: Arc<SlotRegistry>,
    batch_size: usize,
    batch_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut collector = BatchCollector::new(batch_size, batch_timeout);

    loop {
        let deadline = collector.deadline();
        let timer = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = timer, if deadline.is_some() => {
                if let Some(trigger) = collector.should_flush(Instant::now()) {
                    emit(&dispatch, &registry, collector.seal(trigger));
                }
            }
            next = intake.recv() => match next {
                Some(req) => {
                    if collector.add(req).should_flush() {
                        emit(&dispatch, &registry, collector.seal(SealTrigger::Size));
                    }
                }
                None => break,
            },
        }
    }

    // Close intake; requests that already made it in are still batched.
    intake.close();
    while let Some(req) = intake.recv().await {
        if collector.add(req).should_flush() {
            emit(&dispatch, &registry, collector.seal(SealTrigger::Shutdown));
        }
    }
    while !collector.is_empty() {
        emit(&dispatch, &registry, collector.seal(SealTrigger::Shutdown));
    }
    tracing::debug!("Batch former stopped");
}

fn emit(
    dispatch: &mpsc::UnboundedSender<Batch>,
    registry: &SlotRegistry,
    batch: Option<Batch>,
) {
    let Some(batch) = batch else {
        return;
    };
    tracing::debug!(
        batch_seq = batch.seq(),
        batch_size = batch.len(),
        trigger = %batch.trigger(),
        flags = %batch.flags(),
        wait_ms = (batch.cut_at() - batch.created_at()).as_millis() as u64,
        "Batch sealed"
    );
    if let Err(mpsc::error::SendError(batch)) = dispatch.send(batch) {
        // Only reachable once every worker is gone (aborted drain).
        for req in &batch.requests {
            req.slot.resolve(Err(Error::ServiceUnavailable));
            registry.remove(req.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::request::{RequestHandle, RequestId};
    use crate::embeddings::{BackendError, EmbeddingVectors};
    use async_trait::async_trait;

    struct EmptyBackend;

    #[async_trait]
    impl InferenceBackend for EmptyBackend {
        async fn infer(
            &self,
            texts: &[String],
            _flags: OutputFlags,
        ) -> std::result::Result<Vec<EmbeddingVectors>, BackendError> {
            Ok(texts.iter().map(|_| EmbeddingVectors::default()).collect())
        }
    }

    #[tokio::test]
    async fn test_undeliverable_batch_leaves_registry() {
        let registry = SlotRegistry::default();
        let (slot, rx) = ResultSlot::new(RequestId(1));
        registry.insert(Arc::clone(&slot));
        let handle = RequestHandle::new(Arc::clone(&slot), rx);

        let mut collector = BatchCollector::new(1, Duration::from_millis(10));
        collector.add(PendingRequest::new("lost".into(), OutputFlags::ALL, slot));

        let (dispatch, workers_gone) = mpsc::unbounded_channel();
        drop(workers_gone);
        emit(&dispatch, &registry, collector.seal(SealTrigger::Size));

        assert_eq!(registry.len(), 0);
        assert_eq!(handle.wait().await, Err(Error::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_closed_intake_rejects_without_side_effects() {
        let batcher =
            EmbeddingBatcher::new(BatcherConfig::default(), Arc::new(EmptyBackend)).unwrap();
        // Stop the forming task without going through begin_shutdown.
        batcher.shutdown.cancel();
        while !batcher.intake.is_closed() {
            tokio::task::yield_now().await;
        }

        let err = batcher.submit("late", OutputFlags::dense_only()).unwrap_err();
        assert_eq!(err, Error::ServiceUnavailable);
        assert_eq!(batcher.registry.len(), 0);
        assert_eq!(batcher.gate.depth(), 0);
        assert_eq!(batcher.gate.rejected(), 1);
        assert!(batcher.is_draining());
    }
}
