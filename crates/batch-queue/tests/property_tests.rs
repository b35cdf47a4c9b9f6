//! Property-based tests for the bounded queue.
//!
//! These check, over arbitrary operation sequences, the properties the export
//! pipeline relies on: occupancy never exceeds capacity, every enqueue call is
//! accounted for, and records come out in the order they went in.

use batch_queue::{bounded, Enqueued};
use proptest::prelude::*;

// =============================================================================
// Bounded Count + Conservation
// "size() ≤ capacity" and "accepted + dropped == enqueue calls"
// =============================================================================

proptest! {
    /// Enqueueing past capacity never grows the queue beyond capacity, and the
    /// overflow is fully reflected in the dropped counter.
    #[test]
    fn prop_overflow_is_bounded_and_counted(
        capacity in 1usize..64,
        pushes in 0usize..256,
    ) {
        let (producer, consumer) = bounded::<usize>(capacity);

        let mut accepted = 0u64;
        let mut dropped = 0u64;
        for i in 0..pushes {
            match producer.enqueue(i) {
                Enqueued::Accepted => accepted += 1,
                Enqueued::Dropped => dropped += 1,
            }
            prop_assert!(producer.len() <= capacity,
                "len {} exceeds capacity {}", producer.len(), capacity);
        }

        prop_assert_eq!(accepted + dropped, pushes as u64);
        prop_assert_eq!(accepted, pushes.min(capacity) as u64);

        let m = consumer.metrics();
        prop_assert_eq!(m.enqueued, accepted);
        prop_assert_eq!(m.dropped, dropped);
    }
}

proptest! {
    /// Interleaved enqueue/drain sequences keep the counters consistent and the
    /// occupancy within bounds.
    #[test]
    fn prop_interleaved_ops_conserve_records(
        capacity in 1usize..32,
        ops in prop::collection::vec((prop::bool::ANY, 1usize..8), 1..100),
    ) {
        let (producer, mut consumer) = bounded::<u64>(capacity);
        let mut next = 0u64;
        let mut drained_total = 0u64;

        for (is_push, n) in ops {
            if is_push {
                for _ in 0..n {
                    let _ = producer.enqueue(next);
                    next += 1;
                }
            } else {
                let batch = consumer.drain_up_to(n);
                prop_assert!(batch.len() <= n);
                drained_total += batch.len() as u64;
            }
            prop_assert!(consumer.len() <= capacity);
        }

        let m = consumer.metrics();
        prop_assert_eq!(m.enqueued + m.dropped, next);
        prop_assert_eq!(m.drained, drained_total);
        prop_assert_eq!(m.buffered(), consumer.len() as u64);
    }
}

// =============================================================================
// FIFO
// "records enqueued in order [r1, r2, r3] drain in that relative order"
// =============================================================================

proptest! {
    /// A single producer's accepted records drain in enqueue order, across any
    /// split into drain batches.
    #[test]
    fn prop_single_producer_fifo(
        capacity in 1usize..64,
        values in prop::collection::vec(any::<u32>(), 0..200),
        batch in 1usize..16,
    ) {
        let (producer, mut consumer) = bounded::<u32>(capacity);
        let mut accepted = Vec::new();
        let mut drained = Vec::new();

        for chunk in values.chunks(capacity) {
            for &v in chunk {
                if producer.enqueue(v).is_accepted() {
                    accepted.push(v);
                }
            }
            loop {
                let got = consumer.drain_up_to(batch);
                if got.is_empty() {
                    break;
                }
                drained.extend(got);
            }
        }

        prop_assert_eq!(drained, accepted);
    }
}
