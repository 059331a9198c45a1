//! Adaptive micro-batching for embedding inference.
//!
//! Many small embedding requests are grouped into batches so the fixed cost
//! of one model call is paid once per batch instead of once per request.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`EmbeddingBatcher`] | Entry point: submit, await, stats, shutdown |
//! | [`BatcherConfig`] | Batch size, batch timeout, concurrency, queue capacity, drain deadline |
//! | [`RequestHandle`] | Caller side of an admitted request |
//! | [`Batch`] | Sealed, immutable group processed by one backend call |
//! | [`StatsAggregator`] | Cumulative counters and means |
//!
//! ## Batching Rules
//!
//! - **Size trigger**: a forming group that reaches `batch_size` is sealed at once.
//! - **Timeout trigger**: a group is sealed `batch_timeout` after its first
//!   member arrived, even with a single member.
//! - **Union flags**: a batch asks the backend for the OR of its members'
//!   output flags; each caller receives only the kinds it asked for.
//! - **Backpressure**: at most `max_queue_size` requests are Queued or
//!   Batched; further submissions fail fast with `QueueFull`.
//! - **Bounded concurrency**: `processing_concurrency` workers, so at most that
//!   many backend calls are outstanding.
//!
//! ## Example
//!
//! ```rust,no_run
//! use embed_batcher::batch::{BatcherConfig, EmbeddingBatcher};
//! use embed_batcher::embeddings::{InferenceBackend, OutputFlags};
//! use std::sync::Arc;
//!
//! # async fn run(backend: Arc<dyn InferenceBackend>) -> embed_batcher::Result<()> {
//! let batcher = EmbeddingBatcher::new(BatcherConfig::from_env()?, backend)?;
//!
//! let handle = batcher.submit("what is micro-batching?", OutputFlags::dense_only())?;
//! let output = handle.wait().await?;
//! assert!(output.vectors.sparse.is_none());
//!
//! batcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod admission;
mod collector;
mod config;
mod executor;
mod request;
mod scheduler;
mod stats;

pub use collector::{Batch, BatchAddResult, SealTrigger};
pub use config::BatcherConfig;
pub use request::{RequestHandle, RequestId, RequestState};
pub use scheduler::{EmbeddingBatcher, ShutdownReport};
pub use stats::{StatsAggregator, StatsSnapshot};
