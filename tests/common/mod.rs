//! Scripted inference backends shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use embed_batcher::embeddings::{
    BackendError, EmbeddingVectors, InferenceBackend, OutputFlags, SparseWeights,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Call {
    pub texts: Vec<String>,
    pub flags: OutputFlags,
    pub at: Instant,
}

/// Records every call, optionally sleeps, tracks peak concurrency and fails
/// any batch containing a text that starts with `FAIL`.
pub struct RecordingBackend {
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub fn vectors_for(text: &str, flags: OutputFlags) -> EmbeddingVectors {
    let mut v = EmbeddingVectors::default();
    if flags.dense {
        v.dense = Some(vec![text.len() as f32, 1.0]);
    }
    if flags.sparse {
        let mut w = SparseWeights::new();
        w.insert(text.len() as u32, 0.25);
        v.sparse = Some(w);
    }
    if flags.colbert {
        v.colbert = Some(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
    v
}

#[async_trait]
impl InferenceBackend for RecordingBackend {
    async fn infer(
        &self,
        texts: &[String],
        flags: OutputFlags,
    ) -> Result<Vec<EmbeddingVectors>, BackendError> {
        self.calls.lock().unwrap().push(Call {
            texts: texts.to_vec(),
            flags,
            at: Instant::now(),
        });
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if texts.iter().any(|t| t.starts_with("FAIL")) {
            return Err("CUDA error: device-side assert triggered".into());
        }
        Ok(texts.iter().map(|t| vectors_for(t, flags)).collect())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Never returns.
pub struct StallingBackend {
    pub started: AtomicUsize,
}

impl StallingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InferenceBackend for StallingBackend {
    async fn infer(
        &self,
        _texts: &[String],
        _flags: OutputFlags,
    ) -> Result<Vec<EmbeddingVectors>, BackendError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}
