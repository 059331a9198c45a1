//! Request lifecycle: ids, states, single-assignment result slots and the
//! handle a caller awaits.

use crate::embeddings::{EmbeddingOutput, OutputFlags};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Final value delivered through a result slot.
pub(crate) type Outcome = Result<EmbeddingOutput>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// `Queued → Batched → Processing → {Completed | Failed}`. Transitions only
/// move forward. `Rejected` names the outcome of a refused submission; such
/// a submission gets an error instead of a handle, so no slot holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Batched,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Batched => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed | Self::Rejected => 3,
        }
    }
}

struct SlotInner {
    state: RequestState,
    tx: Option<oneshot::Sender<Outcome>>,
}

/// Written exactly once, either by the owning worker or by the shutdown drain.
pub(crate) struct ResultSlot {
    id: RequestId,
    inner: Mutex<SlotInner>,
}

impl ResultSlot {
    pub(crate) fn new(id: RequestId) -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            id,
            inner: Mutex::new(SlotInner {
                state: RequestState::Queued,
                tx: Some(tx),
            }),
        });
        (slot, rx)
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn state(&self) -> RequestState {
        self.lock().state
    }

    /// Moves to a later non-terminal state. Returns false if that would go
    /// backwards or the slot is already resolved.
    pub(crate) fn advance(&self, to: RequestState) -> bool {
        debug_assert!(!to.is_terminal());
        let mut inner = self.lock();
        if inner.state.is_terminal() || to.rank() <= inner.state.rank() {
            return false;
        }
        inner.state = to;
        true
    }

    /// Writes the outcome and wakes the caller. Returns false if the slot was
    /// already resolved.
    pub(crate) fn resolve(&self, outcome: Outcome) -> bool {
        let mut inner = self.lock();
        let Some(tx) = inner.tx.take() else {
            return false;
        };
        inner.state = if outcome.is_ok() {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        drop(inner);
        // A caller that stopped waiting is fine; the slot is still consumed.
        let _ = tx.send(outcome);
        true
    }
}

/// A request owned by the scheduler between admission and fan-out.
pub(crate) struct PendingRequest {
    pub(crate) id: RequestId,
    pub(crate) text: String,
    pub(crate) flags: OutputFlags,
    pub(crate) arrived_at: Instant,
    pub(crate) slot: Arc<ResultSlot>,
}

impl PendingRequest {
    pub(crate) fn new(text: String, flags: OutputFlags, slot: Arc<ResultSlot>) -> Self {
        Self {
            id: slot.id(),
            text,
            flags,
            arrived_at: Instant::now(),
            slot,
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("text_len", &self.text.len())
            .finish()
    }
}

/// Every slot that has been admitted but not yet resolved.
#[derive(Default)]
pub(crate) struct SlotRegistry {
    slots: Mutex<HashMap<RequestId, Arc<ResultSlot>>>,
}

impl SlotRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, Arc<ResultSlot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, slot: Arc<ResultSlot>) {
        self.lock().insert(slot.id(), slot);
    }

    pub(crate) fn remove(&self, id: RequestId) {
        self.lock().remove(&id);
    }

    pub(crate) fn take_all(&self) -> Vec<Arc<ResultSlot>> {
        let mut slots: Vec<_> = self.lock().drain().map(|(_, s)| s).collect();
        slots.sort_by_key(|s| s.id());
        slots
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Caller side of an admitted request.
pub struct RequestHandle {
    id: RequestId,
    slot: Arc<ResultSlot>,
    rx: oneshot::Receiver<Outcome>,
}

impl RequestHandle {
    pub(crate) fn new(slot: Arc<ResultSlot>, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            id: slot.id(),
            slot,
            rx,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.slot.state()
    }

    /// Suspends until a worker resolves the request or the shutdown drain
    /// deadline force-resolves it.
    pub async fn wait(self) -> Result<EmbeddingOutput> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Sender dropped unresolved: the runtime tore the batcher down.
            Err(_) => Err(Error::ServiceUnavailable),
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
