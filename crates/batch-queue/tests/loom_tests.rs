//! Loom-based concurrency tests for batch-queue.
//!
//! Run with: `cargo test -p batch-queue --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores thread interleavings. The queue itself uses std
//! atomics, so the slot-stamp protocol is modelled here in isolation with a
//! small capacity to keep the state space manageable.

#![cfg(feature = "loom")]

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;

const CAPACITY: u64 = 2;

/// Stamp-protocol queue: stamp 2*pos = free for pos, 2*pos+1 = full for pos.
struct LoomQueue {
    tail: AtomicU64,
    head: AtomicU64,
    stamps: [AtomicU64; CAPACITY as usize],
    values: [UnsafeCell<u64>; CAPACITY as usize],
}

unsafe impl Send for LoomQueue {}
unsafe impl Sync for LoomQueue {}

impl LoomQueue {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            stamps: [AtomicU64::new(0), AtomicU64::new(2)],
            values: [UnsafeCell::new(0), UnsafeCell::new(0)],
        }
    }

    /// Producer: returns false when full (drop-newest).
    fn push(&self, value: u64) -> bool {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let idx = (tail % CAPACITY) as usize;
            let stamp = self.stamps[idx].load(Ordering::Acquire);
            let free = tail * 2;

            if stamp == free {
                match self.tail.compare_exchange(
                    tail,
                    tail + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        self.values[idx].with_mut(|v| unsafe { *v = value });
                        self.stamps[idx].store(free + 1, Ordering::Release);
                        return true;
                    }
                    Err(current) => tail = current,
                }
            } else if stamp < free {
                return false;
            } else {
                thread::yield_now();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Consumer: single thread only.
    fn pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let idx = (head % CAPACITY) as usize;
        let stamp = self.stamps[idx].load(Ordering::Acquire);
        if stamp != head * 2 + 1 {
            return None;
        }

        let value = self.values[idx].with(|v| unsafe { *v });
        self.stamps[idx].store((head + CAPACITY) * 2, Ordering::Release);
        self.head.store(head + 1, Ordering::Release);
        Some(value)
    }
}

/// Two producers racing for the same slots never lose or duplicate a record.
#[test]
fn loom_two_producers_one_consumer() {
    loom::model(|| {
        let queue = Arc::new(LoomQueue::new());
        let accepted = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = [10u64, 20]
            .into_iter()
            .map(|v| {
                let q = Arc::clone(&queue);
                let accepted = Arc::clone(&accepted);
                thread::spawn(move || {
                    if q.push(v) {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }

        let mut received = Vec::new();
        while let Some(v) = queue.pop() {
            received.push(v);
        }

        received.sort_unstable();
        assert_eq!(received.len(), accepted.load(Ordering::SeqCst));
        assert_eq!(received, vec![10, 20]);
    });
}

/// Consumer draining concurrently with a producer only ever sees published
/// records, in order.
#[test]
fn loom_concurrent_drain_preserves_order() {
    loom::model(|| {
        let queue = Arc::new(LoomQueue::new());
        let q = Arc::clone(&queue);

        let producer = thread::spawn(move || {
            let mut sent = Vec::new();
            for v in 1..=3 {
                if q.push(v) {
                    sent.push(v);
                }
            }
            sent
        });

        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(v) = queue.pop() {
                received.push(v);
            }
            thread::yield_now();
        }

        let sent = producer.join().unwrap();
        while let Some(v) = queue.pop() {
            received.push(v);
        }

        assert_eq!(received, sent);
    });
}

/// Capacity is never exceeded: with a full queue, a push is rejected until
/// the consumer frees a slot.
#[test]
fn loom_full_queue_rejects_until_drained() {
    loom::model(|| {
        let queue = Arc::new(LoomQueue::new());
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));

        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || q.pop());
        assert_eq!(consumer.join().unwrap(), Some(1));

        assert!(queue.push(3));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    });
}
