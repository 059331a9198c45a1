//! # embed-batcher
//!
//! Adaptive micro-batching scheduler for embedding inference.
//!
//! ## Overview
//!
//! Concurrent callers each ask for vectors of a single text. The batcher
//! groups those requests into batches so one heavy model call serves many
//! callers, then hands every caller exactly the vector kinds it asked for.
//!
//! ## Core Guarantees
//!
//! - **Bounded latency**: a forming batch is sealed `batch_timeout` after its
//!   first member arrived, or immediately when it reaches `batch_size`
//! - **Backpressure**: submissions beyond `max_queue_size` fail fast with
//!   [`Error::QueueFull`]
//! - **Bounded concurrency**: at most `processing_concurrency` backend calls run at once
//! - **Atomic batch failure**: a failed backend call fails every member with
//!   the same reason; the pool keeps serving later batches
//! - **Safe drain**: shutdown flushes pending work and force-fails whatever
//!   misses the drain deadline with [`Error::ShutdownTimeout`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use embed_batcher::batch::{BatcherConfig, EmbeddingBatcher};
//! use embed_batcher::embeddings::{BackendError, EmbeddingVectors, InferenceBackend, OutputFlags};
//! use std::sync::Arc;
//!
//! struct Zeros;
//!
//! #[async_trait::async_trait]
//! impl InferenceBackend for Zeros {
//!     async fn infer(
//!         &self,
//!         texts: &[String],
//!         _flags: OutputFlags,
//!     ) -> Result<Vec<EmbeddingVectors>, BackendError> {
//!         Ok(texts
//!             .iter()
//!             .map(|_| EmbeddingVectors::default().with_dense(vec![0.0; 4]))
//!             .collect())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> embed_batcher::Result<()> {
//!     let batcher = EmbeddingBatcher::new(BatcherConfig::default(), Arc::new(Zeros))?;
//!     let out = batcher.embed("hello", OutputFlags::dense_only()).await?;
//!     assert_eq!(out.vectors.dense.map(|v| v.len()), Some(4));
//!     batcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Admission, batch forming, worker pool, stats, shutdown |
//! | [`embeddings`] | Output flags, vector types, the inference backend trait |
//! | [`validation`] | Pre-admission text and flag validation |
//! | [`error_code`] | Stable error codes for transports |

pub mod batch;
pub mod embeddings;
pub mod error_code;
pub mod validation;

pub use batch::{BatcherConfig, EmbeddingBatcher, RequestHandle, StatsSnapshot};
pub use embeddings::{EmbeddingOutput, InferenceBackend, OutputFlags};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
