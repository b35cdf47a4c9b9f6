use crate::invariants::{
    debug_assert_bounded_count, debug_assert_monotonic, debug_assert_published_read,
};
use crate::{Metrics, QueueMetrics};
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// SLOT STAMP PROTOCOL
// =============================================================================
//
// Producers and the consumer never share a lock. Every slot carries a `stamp`
// that says which position it currently belongs to and whether it holds a
// value:
//
//   stamp == 2 * pos      slot is free for position `pos`
//   stamp == 2 * pos + 1  slot holds the record written at position `pos`
//
// Position `pos` lives in slot `pos % capacity`. Slot `i` starts with stamp
// `2 * i`. Doubling the position (instead of the classic `pos` / `pos + 1`
// encoding) keeps "full for pos" distinct from "free for pos + 1", which is
// what makes capacity 1 work without a power-of-two rounding.
//
// ## Sequence Numbers
//
// `tail` and `head` are unbounded u64 positions. At 10 billion records per
// second the doubled stamp space wraps after ~29 years, so wrap-around is not
// handled.
//
// ## Memory Ordering Protocol
//
// **Producer (enqueue path):**
// 1. Load `tail` with Relaxed
// 2. Load the slot stamp with Acquire (synchronizes with the consumer's
//    Release store that freed the slot)
// 3. stamp == 2*tail: CAS `tail` → tail+1 to claim the position
//    stamp <  2*tail: the slot still holds last lap's record → full
//    stamp >  2*tail: another producer already claimed it → reload `tail`
// 4. Write the record into the slot (exclusive after a successful claim)
// 5. Store stamp = 2*tail + 1 with Release (publishes the write)
//
// **Consumer (drain path):**
// 1. Load `head` with Relaxed (only the consumer writes head)
// 2. Load the slot stamp with Acquire (synchronizes with step 5 above)
// 3. stamp != 2*head + 1: nothing published at head yet → stop
// 4. Move the record out of the slot
// 5. Store stamp = 2*(head + capacity) with Release (frees it for next lap)
// 6. After the batch, store `head` with Release (only read by `len()`)
//
// A producer that claimed a position but has not yet published it blocks the
// consumer at that position; records published behind it are picked up on
// the next drain. Ordering per producer is preserved because one producer's
// claims are strictly increasing positions.
//
// =============================================================================

/// One buffer cell: a stamp plus possibly-uninitialized storage.
struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// State shared between every `Producer` clone and the `Consumer`.
struct Shared<T> {
    // === PRODUCER HOT ===
    /// Next position to claim (written by producers via CAS)
    tail: CachePadded<AtomicU64>,

    // === CONSUMER HOT ===
    /// Next position to drain (written by the consumer only)
    head: CachePadded<AtomicU64>,

    // === COLD STATE ===
    metrics: QueueMetrics,
    capacity: usize,

    /// Fixed-size storage; never grows or shrinks after construction.
    slots: Box<[Slot<T>]>,
}

// Safety: records are moved between threads through the stamp protocol; a slot
// is only touched by the thread that owns its current stamp state.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");

        let slots = (0..capacity as u64)
            .map(|i| Slot {
                stamp: AtomicU64::new(i * 2),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            metrics: QueueMetrics::default(),
            capacity,
            slots,
        }
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos % self.capacity as u64) as usize]
    }

    /// Instantaneous occupancy. Readers tolerate staleness: positions that are
    /// claimed but not yet published are counted.
    #[inline]
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail.saturating_sub(head) as usize).min(self.capacity)
    }

    fn try_push(&self, item: T) -> Result<(), T> {
        let mut backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(tail);
            let stamp = slot.stamp.load(Ordering::Acquire);
            let free = tail * 2;

            if stamp == free {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the successful CAS gives this producer exclusive
                        // ownership of position `tail`. The consumer will not read
                        // the slot until it observes the published stamp below, and
                        // no other producer can claim the slot before the consumer
                        // frees it for the next lap.
                        unsafe {
                            (*slot.value.get()).write(item);
                        }
                        // Counted before publishing so a drained record is always
                        // already counted as enqueued.
                        self.metrics.add_enqueued();
                        slot.stamp.store(free + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        backoff.spin();
                    }
                }
            } else if stamp < free {
                // Slot still holds the record from one lap ago: the queue is full.
                return Err(item);
            } else {
                // Another producer claimed this position; catch up with tail.
                backoff.snooze();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Single-consumer drain. Callers guarantee exclusivity (`Consumer` is
    /// the only caller and takes `&mut self`).
    fn drain_into(&self, max: usize, out: &mut Vec<T>) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let mut pos = head;
        let mut count = 0;

        while count < max {
            let slot = self.slot(pos);
            let stamp = slot.stamp.load(Ordering::Acquire);
            if stamp != pos * 2 + 1 {
                break;
            }
            debug_assert_published_read!(stamp, pos);

            // SAFETY: the Acquire load above observed the producer's Release
            // store of `2 * pos + 1`, so the slot is fully initialized and no
            // producer will touch it until we store the next-lap stamp.
            // assume_init_read moves ownership out; the slot is logically empty.
            let item = unsafe { (*slot.value.get()).assume_init_read() };
            slot.stamp
                .store((pos + self.capacity as u64) * 2, Ordering::Release);

            out.push(item);
            pos += 1;
            count += 1;
        }

        // Only this consumer frees slots, so no claim can run past pos + capacity.
        debug_assert_bounded_count!(
            self.tail.load(Ordering::Acquire).saturating_sub(pos),
            self.capacity
        );

        if count > 0 {
            debug_assert_monotonic!("head", head, pos);
            self.head.store(pos, Ordering::Release);
            self.metrics.add_drained(count as u64);
        }

        count
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Exclusive access: every handle is gone. Drop records still published.
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        for pos in head..tail {
            let idx = (pos % self.capacity as u64) as usize;
            let slot = &mut self.slots[idx];
            if *slot.stamp.get_mut() == pos * 2 + 1 {
                // SAFETY: stamp says the slot holds an initialized record that
                // was never drained.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}

// =============================================================================
// PUBLIC HANDLES
// =============================================================================

/// Creates a bounded MPSC queue holding at most `capacity` records.
///
/// Returns a cloneable [`Producer`] and the single [`Consumer`].
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let shared = Arc::new(Shared::new(capacity));
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

/// Outcome of [`Producer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The record is in the queue.
    Accepted,
    /// The queue was full; the record was discarded and counted.
    Dropped,
}

impl Enqueued {
    #[inline]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Producer handle. Cheap to clone; safe to use from any number of threads.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Producer<T> {
    /// Enqueues a record, applying the drop-newest overflow policy.
    ///
    /// O(1) expected, never blocks, never fails: when the queue is full the
    /// record is dropped and the `dropped` counter is incremented.
    #[inline]
    pub fn enqueue(&self, item: T) -> Enqueued {
        match self.shared.try_push(item) {
            Ok(()) => Enqueued::Accepted,
            Err(_rejected) => {
                self.shared.metrics.add_dropped();
                Enqueued::Dropped
            }
        }
    }

    /// Attempts to enqueue without dropping.
    ///
    /// Returns `Err(item)` if the queue is full, handing the record back to
    /// the caller. Rejections are not counted as drops.
    #[inline]
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.shared.try_push(item)
    }

    /// Approximate number of buffered records.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Records dropped on overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.metrics.dropped()
    }

    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.snapshot()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// The single consumer handle.
///
/// `Consumer` does NOT implement `Clone`, and draining takes `&mut self`, so
/// there is exactly one drainer per queue.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Removes and returns up to `n` records in FIFO order.
    ///
    /// Returns fewer than `n` (possibly none) when fewer are available.
    pub fn drain_up_to(&mut self, n: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(n.min(self.shared.len()));
        self.shared.drain_into(n, &mut out);
        out
    }

    /// Appends up to `n` records to `out`, returning how many were moved.
    pub fn drain_into(&mut self, n: usize, out: &mut Vec<T>) -> usize {
        self.shared.drain_into(n, out)
    }

    /// Approximate number of buffered records.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.snapshot()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
