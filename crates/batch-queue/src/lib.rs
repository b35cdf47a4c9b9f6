//! Batch Queue - Lock-Free Bounded MPSC Buffer
//!
//! A bounded multi-producer single-consumer queue built for telemetry
//! pipelines: any number of application threads enqueue records, and a single
//! export loop drains them in batches.
//!
//! # Key Features
//!
//! - Never blocks a producer: when the queue is full the incoming record is
//!   dropped (drop-newest) and counted
//! - Per-slot stamps instead of a lock, so producers only contend on one CAS
//! - Cache-padded cursors (no false sharing between producers and consumer)
//! - Any capacity >= 1, not only powers of two
//! - Single consumer enforced by the type system (`Consumer` is not `Clone`)
//!
//! # Example
//!
//! ```
//! use batch_queue::{bounded, Enqueued};
//!
//! let (producer, mut consumer) = bounded::<u64>(2);
//!
//! assert_eq!(producer.enqueue(1), Enqueued::Accepted);
//! assert_eq!(producer.enqueue(2), Enqueued::Accepted);
//! assert_eq!(producer.enqueue(3), Enqueued::Dropped);
//!
//! assert_eq!(consumer.drain_up_to(10), vec![1, 2]);
//! assert_eq!(consumer.metrics().dropped, 1);
//! ```

mod invariants;
mod metrics;
mod queue;

pub use metrics::{Metrics, QueueMetrics};
pub use queue::{bounded, Consumer, Enqueued, Producer};
