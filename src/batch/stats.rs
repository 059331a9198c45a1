//! Process-wide batching statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Point-in-time view for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Queued + Batched requests right now.
    pub queue_depth: usize,
    /// Requests resolved successfully.
    pub processed_requests: u64,
    /// Lifetime mean size of successful batches.
    pub avg_batch_size: f64,
    /// Lifetime mean inference time of successful batches.
    pub avg_processing_time_ms: f64,
    /// Batches handed to the backend, successful or not.
    pub total_batches: u64,
    pub failed_batches: u64,
    pub rejected_requests: u64,
    pub last_batch_time_ms: f64,
    pub in_flight_batches: usize,
}

#[derive(Debug, Default)]
struct StatsInner {
    processed_requests: u64,
    successful_batches: u64,
    failed_batches: u64,
    batch_size_sum: u64,
    processing_ms_sum: f64,
    avg_batch_size: f64,
    avg_processing_time_ms: f64,
    last_batch_time_ms: f64,
}

/// Cumulative counters updated by workers after each batch.
///
/// Each update runs inside one critical section so concurrent workers never
/// interleave partial read-modify-writes.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<StatsInner>,
    in_flight: AtomicUsize,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a successful batch.
    ///
    /// Means are cumulative and incremental:
    /// `avg_new = avg_old + (value - avg_old) / count_new`.
    pub fn record_batch(&self, size: usize, processing_ms: f64) {
        let mut st = self.lock();
        st.successful_batches += 1;
        st.processed_requests += size as u64;
        st.batch_size_sum += size as u64;
        st.processing_ms_sum += processing_ms;

        let n = st.successful_batches as f64;
        st.avg_batch_size += (size as f64 - st.avg_batch_size) / n;
        st.avg_processing_time_ms += (processing_ms - st.avg_processing_time_ms) / n;
        st.last_batch_time_ms = processing_ms;
    }

    /// Records a batch whose inference call failed. Averages are untouched.
    pub fn record_failure(&self, processing_ms: f64) {
        let mut st = self.lock();
        st.failed_batches += 1;
        st.last_batch_time_ms = processing_ms;
    }

    pub(crate) fn batch_started(&self) -> usize {
        self.in_flight.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn batch_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Zeroes the gauge once no worker can still be running.
    pub(crate) fn reset_in_flight(&self) {
        self.in_flight.store(0, Ordering::Release);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Cumulative sums `(batch sizes, processing ms)`.
    pub fn totals(&self) -> (u64, f64) {
        let st = self.lock();
        (st.batch_size_sum, st.processing_ms_sum)
    }

    pub fn snapshot(&self, queue_depth: usize, rejected_requests: u64) -> StatsSnapshot {
        let st = self.lock();
        StatsSnapshot {
            queue_depth,
            processed_requests: st.processed_requests,
            avg_batch_size: st.avg_batch_size,
            avg_processing_time_ms: st.avg_processing_time_ms,
            total_batches: st.successful_batches + st.failed_batches,
            failed_batches: st.failed_batches,
            rejected_requests,
            last_batch_time_ms: st.last_batch_time_ms,
            in_flight_batches: self.in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsAggregator::new();
        let snap = stats.snapshot(0, 0);
        assert_eq!(snap.processed_requests, 0);
        assert_eq!(snap.avg_batch_size, 0.0);
        assert_eq!(snap.avg_processing_time_ms, 0.0);
        assert_eq!(snap.total_batches, 0);
    }

    #[test]
    fn test_cumulative_means() {
        let stats = StatsAggregator::new();
        stats.record_batch(3, 10.0);
        stats.record_batch(5, 20.0);
        stats.record_batch(8, 60.0);

        let snap = stats.snapshot(4, 2);
        assert!((snap.avg_batch_size - 16.0 / 3.0).abs() < 1e-12);
        assert!((snap.avg_processing_time_ms - 30.0).abs() < 1e-12);
        assert_eq!(snap.processed_requests, 16);
        assert_eq!(snap.total_batches, 3);
        assert_eq!(snap.last_batch_time_ms, 60.0);
        assert_eq!(snap.queue_depth, 4);
        assert_eq!(snap.rejected_requests, 2);
        assert_eq!(stats.totals(), (16, 90.0));
    }

    #[test]
    fn test_failures_do_not_move_means() {
        let stats = StatsAggregator::new();
        stats.record_batch(4, 8.0);
        stats.record_failure(100.0);
        let snap = stats.snapshot(0, 0);
        assert_eq!(snap.avg_batch_size, 4.0);
        assert_eq!(snap.avg_processing_time_ms, 8.0);
        assert_eq!(snap.total_batches, 2);
        assert_eq!(snap.failed_batches, 1);
        assert_eq!(snap.processed_requests, 4);
    }

    #[test]
    fn test_in_flight_gauge() {
        let stats = StatsAggregator::new();
        assert_eq!(stats.batch_started(), 1);
        assert_eq!(stats.batch_started(), 2);
        stats.batch_finished();
        assert_eq!(stats.in_flight(), 1);
        stats.reset_in_flight();
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let stats = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        s.record_batch(2, 1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot(0, 0);
        assert_eq!(snap.processed_requests, 2000);
        assert_eq!(snap.total_batches, 1000);
        assert!((snap.avg_batch_size - 2.0).abs() < 1e-12);
    }
}
