//! Inference backend boundary.

use super::types::{EmbeddingVectors, OutputFlags};
use async_trait::async_trait;

/// Opaque failure reported by a backend for a whole call.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// The model that turns texts into vectors.
///
/// Called once per sealed batch with the batch texts in order and the union
/// of the members' flags. Must return exactly one [`EmbeddingVectors`] per
/// input, in input order, carrying at least the kinds in `flags`. A failure
/// fails every member of the batch.
///
/// The batcher bounds concurrent calls to `PROCESSING_CONCURRENCY`; the
/// implementation needs no locking of its own beyond that.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(
        &self,
        texts: &[String],
        flags: OutputFlags,
    ) -> std::result::Result<Vec<EmbeddingVectors>, BackendError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "inference"
    }
}
