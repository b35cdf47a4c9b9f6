//! Batch processor: buffers records from any thread and exports them in
//! batches from a single background task.
//!
//! # Export loop
//!
//! ```text
//!  producers ──on_emit──► batch_queue ──drain──► export loop ──► Exporter
//!                             │                      ▲
//!                             └── len >= threshold ──┤ (Notify)
//!                                   scheduled delay ─┤ (Clock timer)
//!                              force_flush/shutdown ─┘ (command channel)
//! ```
//!
//! The loop exports at most `max_export_batch_size` records per call and
//! waits for each export (bounded by `export_timeout`) before draining the
//! next batch, so batches are exported in drain order.
//!
//! # Lifecycle
//!
//! `Running → ShuttingDown → Shutdown`, never backwards. Records emitted
//! outside `Running` are dropped and counted.
//!
//! Every `on_emit` call ends up in exactly one of: exported (or failed) with
//! a batch, `dropped_overflow`, or `dropped_after_shutdown`. Shutdown waits
//! for emits that already passed the state check before its final flush.

use crate::clock::{Clock, TokioClock};
use crate::config::ProcessorConfig;
use crate::error::{ConfigError, ExportError};
use crate::export_result::ExportResult;
use crate::exporter::Exporter;
use batch_queue::{bounded, Consumer, Enqueued, Metrics, Producer};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

/// Processor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProcessorState {
    Running = 0,
    ShuttingDown = 1,
    Shutdown = 2,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Shutdown,
        }
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    // SeqCst pairs with `Shared::emitting`: an emitter and shutdown each
    // observe the other's write.
    fn load(&self) -> ProcessorState {
        ProcessorState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves `from → to`; fails if the current state is not `from`.
    fn advance(&self, from: ProcessorState, to: ProcessorState) -> bool {
        debug_assert!(to > from, "state may only move forward: {:?} -> {:?}", from, to);
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Drop and export counters.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    dropped_overflow: AtomicU64,
    dropped_after_shutdown: AtomicU64,
    records_exported: AtomicU64,
    batches_exported: AtomicU64,
    export_failures: AtomicU64,
    export_timeouts: AtomicU64,
}

impl ProcessorMetrics {
    /// Records discarded because the buffer was full.
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    /// Records passed to `on_emit` after shutdown began.
    pub fn dropped_after_shutdown(&self) -> u64 {
        self.dropped_after_shutdown.load(Ordering::Relaxed)
    }

    /// Records in batches whose export succeeded.
    pub fn records_exported(&self) -> u64 {
        self.records_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    /// Exports that resolved to a failure, timeouts included.
    pub fn export_failures(&self) -> u64 {
        self.export_failures.load(Ordering::Relaxed)
    }

    pub fn export_timeouts(&self) -> u64 {
        self.export_timeouts.load(Ordering::Relaxed)
    }

    fn record_success(&self, records: usize) {
        self.records_exported
            .fetch_add(records as u64, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_timeout(&self) {
        self.export_timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the handle and the export loop.
struct Shared {
    state: StateCell,
    /// `on_emit` calls between their state check and their enqueue.
    emitting: AtomicUsize,
    wake: Notify,
    metrics: ProcessorMetrics,
}

enum Command {
    Flush(ExportResult),
    Shutdown(ExportResult),
}

/// Buffers records and exports them in batches from a background task.
///
/// `on_emit` may be called from any thread; it never blocks and never fails.
pub struct BatchProcessor<R> {
    producer: Producer<R>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    threshold: usize,
    exporter_name: String,
    shutdown_result: OnceLock<ExportResult>,
}

impl<R: Send + 'static> BatchProcessor<R> {
    /// Validates `config` and starts the export loop on the current Tokio runtime.
    pub fn new<E>(config: ProcessorConfig, exporter: E) -> Result<Self, ConfigError>
    where
        E: Exporter<R>,
    {
        Self::with_clock(config, exporter, Arc::new(TokioClock))
    }

    /// Like [`new`](Self::new) with an explicit clock for timers.
    pub fn with_clock<E>(
        config: ProcessorConfig,
        exporter: E,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError>
    where
        E: Exporter<R>,
    {
        let config = config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let (producer, consumer) = bounded(config.max_queue_size);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: StateCell(AtomicU8::new(ProcessorState::Running as u8)),
            emitting: AtomicUsize::new(0),
            wake: Notify::new(),
            metrics: ProcessorMetrics::default(),
        });
        let threshold = config.batch_size_threshold();
        let exporter_name = exporter.name().to_string();

        debug!(
            exporter = %exporter_name,
            max_queue_size = config.max_queue_size,
            max_export_batch_size = config.max_export_batch_size,
            threshold,
            scheduled_delay_ms = config.scheduled_delay.as_millis() as u64,
            "starting batch processor"
        );

        let export_loop = ExportLoop {
            consumer,
            exporter,
            clock,
            threshold,
            config,
            shared: Arc::clone(&shared),
            commands: command_rx,
        };
        runtime.spawn(export_loop.run());

        Ok(Self {
            producer,
            shared,
            commands,
            threshold,
            exporter_name,
            shutdown_result: OnceLock::new(),
        })
    }

    /// Hands a record to the pipeline.
    ///
    /// Dropped silently when the buffer is full or the processor is shutting
    /// down; both cases are counted.
    pub fn on_emit(&self, record: R) {
        self.shared.emitting.fetch_add(1, Ordering::SeqCst);
        if self.shared.state.load() != ProcessorState::Running {
            self.shared.emitting.fetch_sub(1, Ordering::SeqCst);
            self.shared
                .metrics
                .dropped_after_shutdown
                .fetch_add(1, Ordering::Relaxed);
            trace!("processor is shut down, dropping record");
            return;
        }

        let enqueued = self.producer.enqueue(record);
        self.shared.emitting.fetch_sub(1, Ordering::SeqCst);
        if enqueued == Enqueued::Dropped {
            self.shared
                .metrics
                .dropped_overflow
                .fetch_add(1, Ordering::Relaxed);
            trace!(capacity = self.producer.capacity(), "buffer full, dropping record");
        }
        if self.producer.len() >= self.threshold {
            self.shared.wake.notify_one();
        }
    }

    /// Exports everything buffered now; resolves once those exports resolve.
    pub fn force_flush(&self) -> ExportResult {
        if self.shared.state.load() != ProcessorState::Running {
            return ExportResult::failure(ExportError::Shutdown);
        }
        let result = ExportResult::pending();
        if self.commands.send(Command::Flush(result.clone())).is_err() {
            return ExportResult::failure(ExportError::Shutdown);
        }
        result
    }

    /// Flushes, shuts the exporter down and stops the loop.
    ///
    /// Only the first call does any work; every call returns the same result.
    pub fn shutdown(&self) -> ExportResult {
        self.shutdown_result
            .get_or_init(|| {
                let advanced = self
                    .shared
                    .state
                    .advance(ProcessorState::Running, ProcessorState::ShuttingDown);
                debug_assert!(advanced, "shutdown started twice");
                debug!(exporter = %self.exporter_name, "shutting down batch processor");

                let result = ExportResult::pending();
                if self.commands.send(Command::Shutdown(result.clone())).is_err() {
                    // The loop is gone with its runtime; nothing left to flush.
                    self.shared
                        .state
                        .advance(ProcessorState::ShuttingDown, ProcessorState::Shutdown);
                    return ExportResult::failure(ExportError::Shutdown);
                }
                result
            })
            .clone()
    }

    pub fn state(&self) -> ProcessorState {
        self.shared.state.load()
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.shared.metrics
    }

    /// Raw buffer counters: accepted, dropped on overflow, drained.
    pub fn queue_metrics(&self) -> Metrics {
        self.producer.metrics()
    }

    /// Records currently buffered (approximate).
    pub fn buffered(&self) -> usize {
        self.producer.len()
    }
}

impl<R> fmt::Debug for BatchProcessor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("exporter", &self.exporter_name)
            .field("state", &self.shared.state.load())
            .field("buffered", &self.producer.len())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Background task owning the consumer half and the exporter.
struct ExportLoop<R, E> {
    consumer: Consumer<R>,
    exporter: E,
    clock: Arc<dyn Clock>,
    threshold: usize,
    config: ProcessorConfig,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<R, E> ExportLoop<R, E>
where
    R: Send + 'static,
    E: Exporter<R>,
{
    async fn run(mut self) {
        let delay = self.config.scheduled_delay;
        let mut next_export = self.clock.now() + delay;

        loop {
            let backlog = self.consumer.len() >= self.threshold;
            let timer = self
                .clock
                .sleep(next_export.saturating_duration_since(self.clock.now()));

            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Flush(reply)) => {
                        let flushed = self.flush().await;
                        forward(&flushed, reply);
                        next_export = self.clock.now() + delay;
                        continue;
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown(reply).await;
                        return;
                    }
                    None => {
                        debug!("processor handle dropped, flushing and stopping");
                        let _ = self.flush().await.wait().await;
                        return;
                    }
                },
                () = std::future::ready(()), if backlog => {}
                () = self.shared.wake.notified() => {}
                () = timer => {}
            }

            if self.consumer.len() >= self.threshold || self.clock.now() >= next_export {
                let limit = self.config.max_export_batch_size;
                self.export_batch(limit).await;
                next_export = self.clock.now() + delay;
                // Exports can resolve without suspending and a drain can come
                // back empty while slots are claimed but unpublished.
                tokio::task::yield_now().await;
            }
        }
    }

    /// Drains up to `limit` records and exports them.
    ///
    /// Returns the number of records exported and an already-resolved result,
    /// or `None` if the buffer was empty.
    async fn export_batch(&mut self, limit: usize) -> Option<(usize, ExportResult)> {
        let batch = self.consumer.drain_up_to(limit);
        if batch.is_empty() {
            return None;
        }
        let count = batch.len();

        let pending = match self.exporter.marshal(batch) {
            Ok(payload) => self.exporter.export(payload),
            Err(e) => ExportResult::failure(e),
        };

        let outcome = tokio::select! {
            outcome = pending.wait() => outcome,
            () = self.clock.sleep(self.config.export_timeout) => {
                self.shared.metrics.record_timeout();
                Err(ExportError::Timeout)
            }
        };

        match &outcome {
            Ok(()) => {
                self.shared.metrics.record_success(count);
                debug!(exporter = self.exporter.name(), records = count, "exported batch");
            }
            Err(e) => {
                self.shared.metrics.record_failure();
                warn!(exporter = self.exporter.name(), records = count, error = %e, "batch export failed");
            }
        }

        let resolved = ExportResult::pending();
        resolved.resolve(outcome);
        Some((count, resolved))
    }

    /// Exports the records buffered when the flush starts, batch by batch.
    ///
    /// Records emitted while flushing may ride along but are not waited for,
    /// so a steady stream of producers cannot keep a flush running forever.
    async fn flush(&mut self) -> ExportResult {
        let mut remaining = self.consumer.len();
        let mut results = Vec::new();

        while remaining > 0 {
            let limit = remaining.min(self.config.max_export_batch_size);
            match self.export_batch(limit).await {
                Some((count, result)) => {
                    remaining = remaining.saturating_sub(count);
                    results.push(result);
                }
                None => break,
            }
        }

        ExportResult::of_all(results)
    }

    async fn shutdown(mut self, reply: ExportResult) {
        // Refuse new commands; fail flushes that raced with shutdown.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Flush(pending) | Command::Shutdown(pending) => {
                    pending.fail(ExportError::Shutdown);
                }
            }
        }

        // Emits that saw `Running` finish within a few instructions.
        while self.shared.emitting.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }

        let flushed = self.flush().await;
        let exporter_shutdown = self.exporter.shutdown();
        let all = ExportResult::of_all([flushed, exporter_shutdown]);
        let outcome = all.wait().await;

        self.shared
            .state
            .advance(ProcessorState::ShuttingDown, ProcessorState::Shutdown);
        debug!(exporter = self.exporter.name(), ?outcome, "batch processor stopped");
        reply.resolve(outcome);
    }
}

/// Resolves `to` with `from`'s outcome once `from` completes.
fn forward(from: &ExportResult, to: ExportResult) {
    from.when_complete(move |outcome| {
        to.resolve(outcome.clone());
    });
}
