//! Embedding data model and the inference backend boundary.
//!
//! This module provides:
//! - Output selection flags (dense / sparse / colbert)
//! - Per-text vector bundles and the per-request result type
//! - The [`InferenceBackend`] trait the batch workers call

mod backend;
mod types;

pub use backend::{BackendError, InferenceBackend};
pub use types::{EmbeddingOutput, EmbeddingUsage, EmbeddingVectors, OutputFlags, SparseWeights};
