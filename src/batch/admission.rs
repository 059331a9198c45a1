//! Admission gate: capacity reservation and the draining switch.

use super::request::RequestId;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Tracks Queued + Batched requests against `max_queue_size`.
///
/// A slot is reserved atomically at admission and released when a worker
/// takes the request into processing.
#[derive(Debug)]
pub(crate) struct AdmissionGate {
    max: usize,
    depth: AtomicUsize,
    draining: AtomicBool,
    rejected: AtomicU64,
    next_id: AtomicU64,
}

impl AdmissionGate {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max,
            depth: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            rejected: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserves one queue slot and allocates a request id. On rejection
    /// nothing but the rejection counter changes.
    pub(crate) fn try_admit(&self) -> Result<RequestId> {
        if self.is_draining() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ServiceUnavailable);
        }
        let max = self.max;
        self.depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                (d < max).then_some(d + 1)
            })
            .map_err(|_| {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Error::QueueFull { max }
            })?;
        Ok(RequestId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    pub(crate) fn release(&self, n: usize) {
        let _ = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_sub(n))
            });
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.max
    }

    pub(crate) fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Closes admission. Returns true on the first call only.
    pub(crate) fn begin_draining(&self) -> bool {
        !self.draining.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}
