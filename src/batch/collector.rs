//! Batch collector: the forming group and the sealed batch.

use super::request::{PendingRequest, RequestId, RequestState};
use crate::embeddings::OutputFlags;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Why a forming group was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTrigger {
    /// The group reached `batch_size`.
    Size,
    /// The group's age reached `batch_timeout`.
    Timeout,
    /// Shutdown flushed the group early.
    Shutdown,
}

impl fmt::Display for SealTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Timeout => write!(f, "timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// An immutable group of requests handed to one worker.
///
/// `flags` is the union of every member's flags. The backend computes that
/// superset once and each member later keeps only its own kinds, so a batch
/// mixing e.g. dense-only and colbert-only requests pays for both kinds on
/// every text. Operators sizing GPU capacity under diverse flag mixes should
/// budget for the union, not the average request.
#[derive(Debug)]
pub struct Batch {
    seq: u64,
    pub(crate) requests: Vec<PendingRequest>,
    flags: OutputFlags,
    created_at: Instant,
    cut_at: Instant,
    trigger: SealTrigger,
}

impl Batch {
    /// Sequence number in creation order, starting at 1.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn flags(&self) -> OutputFlags {
        self.flags
    }

    pub fn trigger(&self) -> SealTrigger {
        self.trigger
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn cut_at(&self) -> Instant {
        self.cut_at
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(|r| r.id).collect()
    }

    /// Member texts in batch order.
    pub fn texts(&self) -> Vec<String> {
        self.requests.iter().map(|r| r.text.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAddResult {
    Added { count: usize },
    ShouldFlush { count: usize },
}

impl BatchAddResult {
    pub fn should_flush(&self) -> bool {
        matches!(self, BatchAddResult::ShouldFlush { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            BatchAddResult::Added { count } | BatchAddResult::ShouldFlush { count } => *count,
        }
    }
}

/// The forming group. Owned by the single scheduling task, so no locking.
///
/// Never holds more than `max_batch_size` requests: callers seal as soon as
/// [`BatchCollector::add`] reports `ShouldFlush`.
pub(crate) struct BatchCollector {
    max_batch_size: usize,
    max_wait: Duration,
    items: Vec<PendingRequest>,
    group_start: Option<Instant>,
    deadline: Option<Instant>,
    sealed: u64,
}

impl BatchCollector {
    pub(crate) fn new(max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            max_batch_size,
            max_wait,
            items: Vec::with_capacity(max_batch_size),
            group_start: None,
            deadline: None,
            sealed: 0,
        }
    }

    /// Appends to the forming group. The first member of an empty group
    /// starts the age timer, measured from that member's arrival.
    pub(crate) fn add(&mut self, req: PendingRequest) -> BatchAddResult {
        if self.items.is_empty() {
            self.group_start = Some(Instant::now());
            self.deadline = Some(req.arrived_at + self.max_wait);
        }
        self.items.push(req);
        let count = self.items.len();
        if count >= self.max_batch_size {
            BatchAddResult::ShouldFlush { count }
        } else {
            BatchAddResult::Added { count }
        }
    }

    /// When the timeout trigger fires for the current group, if any.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn should_flush(&self, now: Instant) -> Option<SealTrigger> {
        if self.items.len() >= self.max_batch_size {
            return Some(SealTrigger::Size);
        }
        match self.deadline {
            Some(d) if now >= d => Some(SealTrigger::Timeout),
            _ => None,
        }
    }

    /// Seals the oldest `max_batch_size` members. Cancels the timer for the
    /// sealed group; any remainder starts a fresh group now.
    pub(crate) fn seal(&mut self, trigger: SealTrigger) -> Option<Batch> {
        if self.items.is_empty() {
            return None;
        }
        let take = self.items.len().min(self.max_batch_size);
        let requests: Vec<PendingRequest> = self.items.drain(..take).collect();
        let now = Instant::now();
        let created_at = self.group_start.unwrap_or(now);

        if self.items.is_empty() {
            self.group_start = None;
            self.deadline = None;
        } else {
            self.group_start = Some(now);
            self.deadline = Some(now + self.max_wait);
        }

        let flags = requests
            .iter()
            .fold(OutputFlags::NONE, |acc, r| acc | r.flags);
        for r in &requests {
            r.slot.advance(RequestState::Batched);
        }
        self.sealed += 1;

        Some(Batch {
            seq: self.sealed,
            requests,
            flags,
            created_at,
            cut_at: now,
            trigger,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::request::ResultSlot;

    fn pending(id: u64, flags: OutputFlags) -> PendingRequest {
        let (slot, _rx) = ResultSlot::new(RequestId(id));
        PendingRequest::new(format!("text {}", id), flags, slot)
    }

    #[tokio::test]
    async fn test_collector_empty() {
        let mut c = BatchCollector::new(4, Duration::from_millis(50));
        assert!(c.is_empty());
        assert!(c.deadline().is_none());
        assert!(c.should_flush(Instant::now()).is_none());
        assert!(c.seal(SealTrigger::Timeout).is_none());
    }

    #[tokio::test]
    async fn test_size_trigger_reports_flush() {
        let mut c = BatchCollector::new(3, Duration::from_millis(50));
        assert_eq!(c.add(pending(1, OutputFlags::ALL)), BatchAddResult::Added { count: 1 });
        assert!(!c.add(pending(2, OutputFlags::ALL)).should_flush());
        let r = c.add(pending(3, OutputFlags::ALL));
        assert!(r.should_flush());
        assert_eq!(r.count(), 3);
        assert_eq!(c.should_flush(Instant::now()), Some(SealTrigger::Size));

        let batch = c.seal(SealTrigger::Size).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ids(), vec![RequestId(1), RequestId(2), RequestId(3)]);
        assert_eq!(batch.seq(), 1);
        assert!(c.is_empty());
        assert!(c.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_trigger_after_max_wait() {
        let mut c = BatchCollector::new(8, Duration::from_millis(50));
        let start = Instant::now();
        c.add(pending(1, OutputFlags::ALL));
        assert_eq!(c.deadline(), Some(start + Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(49)).await;
        assert!(c.should_flush(Instant::now()).is_none());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(c.should_flush(Instant::now()), Some(SealTrigger::Timeout));

        let batch = c.seal(SealTrigger::Timeout).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.trigger(), SealTrigger::Timeout);
        assert_eq!(batch.cut_at() - batch.created_at(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_union_flags_and_member_states() {
        let mut c = BatchCollector::new(8, Duration::from_millis(50));
        c.add(pending(1, OutputFlags::dense_only()));
        c.add(pending(2, OutputFlags::sparse_only()));
        let batch = c.seal(SealTrigger::Timeout).unwrap();
        assert_eq!(batch.flags(), OutputFlags::new(true, true, false));
        assert!(batch
            .requests
            .iter()
            .all(|r| r.slot.state() == RequestState::Batched));
        assert_eq!(batch.texts(), vec!["text 1".to_string(), "text 2".to_string()]);
    }

    #[tokio::test]
    async fn test_seal_never_exceeds_max() {
        let mut c = BatchCollector::new(2, Duration::from_millis(50));
        // Overfill directly to exercise the remainder path.
        for id in 1..=5 {
            c.add(pending(id, OutputFlags::ALL));
        }
        let mut sizes = Vec::new();
        while let Some(b) = c.seal(SealTrigger::Shutdown) {
            sizes.push(b.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
