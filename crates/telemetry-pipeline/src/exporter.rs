//! Exporter adapters called by the batch processor.
//!
//! The processor hands each drained batch to [`Exporter::marshal`] and passes
//! the payload to [`Exporter::export`]. Both run on the export loop task only;
//! an exporter needs no internal synchronization for the processor's sake.

use crate::config::ExporterConfig;
use crate::error::{ConfigError, ExportError};
use crate::export_result::ExportResult;
use crate::headers::{validate_headers, StaticHeaders};
use crate::sender::{PayloadProducer, RetryingSender};
use crate::transport::HttpTransport;
use serde::Serialize;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Turns a batch into a payload and delivers it.
pub trait Exporter<R>: Send + 'static {
    /// What `marshal` produces and `export` consumes.
    type Payload: Send + 'static;

    fn marshal(&self, batch: Vec<R>) -> Result<Self::Payload, ExportError>;

    /// Starts delivery. The result may resolve later.
    fn export(&self, payload: Self::Payload) -> ExportResult;

    /// Releases resources; called once by the processor during its shutdown.
    fn shutdown(&self) -> ExportResult;

    fn name(&self) -> &str;
}

/// Wire encoding of a batch.
pub trait Marshaler<R>: Send + Sync + 'static {
    fn write_batch(&self, records: &[R], out: &mut dyn Write) -> io::Result<()>;

    fn content_type(&self) -> &str;
}

/// `{"records": [...]}` JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshaler;

impl<R: Serialize> Marshaler<R> for JsonMarshaler {
    fn write_batch(&self, records: &[R], out: &mut dyn Write) -> io::Result<()> {
        #[derive(Serialize)]
        struct Envelope<'a, R> {
            records: &'a [R],
        }
        serde_json::to_writer(out, &Envelope { records })?;
        Ok(())
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}

/// A drained batch plus the marshaler that encodes it.
///
/// Encoding happens in [`PayloadProducer::write_to`], so every delivery
/// attempt re-runs the marshaler over the same records.
pub struct MarshaledBatch<R, M> {
    records: Arc<[R]>,
    marshaler: Arc<M>,
}

impl<R, M> MarshaledBatch<R, M> {
    pub fn new(records: Vec<R>, marshaler: Arc<M>) -> Self {
        Self {
            records: records.into(),
            marshaler,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }
}

impl<R, M> Clone for MarshaledBatch<R, M> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            marshaler: Arc::clone(&self.marshaler),
        }
    }
}

impl<R, M> PayloadProducer for MarshaledBatch<R, M>
where
    R: Send + Sync + 'static,
    M: Marshaler<R>,
{
    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        self.marshaler.write_batch(&self.records, out)
    }

    fn content_type(&self) -> &str {
        self.marshaler.content_type()
    }
}

/// Marshals with `M` and delivers through a [`RetryingSender`].
pub struct HttpExporter<R, M> {
    marshaler: Arc<M>,
    sender: RetryingSender,
    _records: PhantomData<fn(R)>,
}

impl<R, M> HttpExporter<R, M>
where
    R: Send + Sync + 'static,
    M: Marshaler<R>,
{
    /// Builds the transport and sender from `config`. Needs a Tokio runtime.
    pub fn new(config: &ExporterConfig, marshaler: M) -> Result<Self, ConfigError> {
        validate_headers(&config.headers)?;
        let transport = HttpTransport::new(&config.endpoint, config.timeout)?;
        let sender = RetryingSender::builder(transport)
            .retry_policy(config.retry)
            .compression(config.compression)
            .headers(StaticHeaders::new(config.headers.clone()))
            .build()?;
        Ok(Self::with_sender(marshaler, sender))
    }

    pub fn with_sender(marshaler: M, sender: RetryingSender) -> Self {
        Self {
            marshaler: Arc::new(marshaler),
            sender,
            _records: PhantomData,
        }
    }

    pub fn sender(&self) -> &RetryingSender {
        &self.sender
    }
}

impl<R, M> Exporter<R> for HttpExporter<R, M>
where
    R: Send + Sync + 'static,
    M: Marshaler<R>,
{
    type Payload = MarshaledBatch<R, M>;

    fn marshal(&self, batch: Vec<R>) -> Result<Self::Payload, ExportError> {
        Ok(MarshaledBatch::new(batch, Arc::clone(&self.marshaler)))
    }

    fn export(&self, payload: Self::Payload) -> ExportResult {
        self.sender.send(payload)
    }

    fn shutdown(&self) -> ExportResult {
        self.sender.shutdown()
    }

    fn name(&self) -> &str {
        "otlp-http"
    }
}

/// Stateless exporter that accepts and discards everything.
///
/// Stands in wherever no real pipeline is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

impl<R: Send + 'static> Exporter<R> for NoopExporter {
    type Payload = usize;

    fn marshal(&self, batch: Vec<R>) -> Result<usize, ExportError> {
        Ok(batch.len())
    }

    fn export(&self, _payload: usize) -> ExportResult {
        ExportResult::success()
    }

    fn shutdown(&self) -> ExportResult {
        ExportResult::success()
    }

    fn name(&self) -> &str {
        "noop"
    }
}

struct Collected<R> {
    batches: Mutex<Vec<Vec<R>>>,
    shutdown_calls: AtomicUsize,
}

/// Keeps every exported batch in memory. Clones share storage.
pub struct InMemoryExporter<R> {
    inner: Arc<Collected<R>>,
}

impl<R> Clone for InMemoryExporter<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> Default for InMemoryExporter<R> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Collected {
                batches: Mutex::new(Vec::new()),
                shutdown_calls: AtomicUsize::new(0),
            }),
        }
    }
}

impl<R: Clone> InMemoryExporter<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<R>> {
        self.inner
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All exported records in export order.
    pub fn records(&self) -> Vec<R> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn export_calls(&self) -> usize {
        self.inner
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.inner.shutdown_calls.load(Ordering::Relaxed)
    }
}

impl<R: Send + 'static> Exporter<R> for InMemoryExporter<R> {
    type Payload = Vec<R>;

    fn marshal(&self, batch: Vec<R>) -> Result<Vec<R>, ExportError> {
        Ok(batch)
    }

    fn export(&self, payload: Vec<R>) -> ExportResult {
        self.inner
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        ExportResult::success()
    }

    fn shutdown(&self) -> ExportResult {
        self.inner.shutdown_calls.fetch_add(1, Ordering::Relaxed);
        ExportResult::success()
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_marshaler_envelope() {
        let batch = MarshaledBatch::new(vec![1u32, 2, 3], Arc::new(JsonMarshaler));
        let mut out = Vec::new();
        batch.write_to(&mut out).unwrap();
        assert_eq!(out, br#"{"records":[1,2,3]}"#);
        assert_eq!(PayloadProducer::content_type(&batch), "application/json");
    }

    #[test]
    fn test_marshaled_batch_is_reproducible() {
        let batch = MarshaledBatch::new(vec!["a".to_string(), "b".to_string()], Arc::new(JsonMarshaler));
        let mut first = Vec::new();
        let mut second = Vec::new();
        batch.write_to(&mut first).unwrap();
        batch.clone().write_to(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_in_memory_exporter_collects() {
        let exporter = InMemoryExporter::<u8>::new();
        let handle = exporter.clone();

        let payload = exporter.marshal(vec![1, 2]).unwrap();
        assert!(exporter.export(payload).is_success());
        assert!(Exporter::<u8>::shutdown(&exporter).is_success());

        assert_eq!(handle.batches(), vec![vec![1, 2]]);
        assert_eq!(handle.shutdown_calls(), 1);
    }

    #[test]
    fn test_http_exporter_rejects_illegal_header() {
        let config = ExporterConfig::default().with_header("bad header", "v");
        let result = HttpExporter::<u32, _>::new(&config, JsonMarshaler);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_noop_exporter() {
        let exporter = NoopExporter;
        let payload = Exporter::<String>::marshal(&exporter, vec!["x".into()]).unwrap();
        assert_eq!(payload, 1);
        assert!(Exporter::<String>::export(&exporter, payload).is_success());
    }
}
