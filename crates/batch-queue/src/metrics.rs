use crate::invariants::debug_assert_drained_le_enqueued;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the queue counters.
///
/// `enqueued + dropped` equals the number of `enqueue` calls made so far
/// (plus successful `try_push` calls, which count as enqueued).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Records accepted into the queue.
    pub enqueued: u64,
    /// Records rejected because the queue was full (drop-newest).
    pub dropped: u64,
    /// Records handed to the consumer.
    pub drained: u64,
}

impl Metrics {
    /// Records currently accounted as buffered (`enqueued - drained`).
    pub fn buffered(&self) -> u64 {
        self.enqueued.saturating_sub(self.drained)
    }
}

/// Thread-safe counters shared by every producer and the consumer.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
}

impl QueueMetrics {
    #[inline]
    pub(crate) fn add_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_drained(&self, n: u64) {
        // Release pairs with the Acquire in `snapshot()`: every enqueue that
        // was drained is then visible to the reader.
        self.drained.fetch_add(n, Ordering::Release);
    }

    /// Total records dropped on overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Takes a snapshot. Counters are read independently, so a snapshot taken
    /// under concurrent enqueues may be slightly stale.
    pub fn snapshot(&self) -> Metrics {
        let drained = self.drained.load(Ordering::Acquire);
        let enqueued = self.enqueued.load(Ordering::Acquire);
        debug_assert_drained_le_enqueued!(drained, enqueued);
        Metrics {
            enqueued,
            dropped: self.dropped.load(Ordering::Relaxed),
            drained,
        }
    }
}
