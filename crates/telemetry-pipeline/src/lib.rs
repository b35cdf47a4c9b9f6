//! Telemetry Pipeline - Batching Export with Retry
//!
//! Buffers telemetry records from any number of application threads, batches
//! them on a background Tokio task, and delivers each batch to a collector
//! with retry, backoff and optional gzip compression.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌─────────────┐    ┌────────────────┐    ┌───────────────┐
//! │ app threads  │───►│ batch_queue │───►│ BatchProcessor │───►│ Exporter      │
//! │ (on_emit)    │    │ (lock-free) │    │ (export loop)  │    │  marshal      │
//! └──────────────┘    └─────────────┘    └────────────────┘    │  RetryingSender│
//!                                                │             └───────┬───────┘
//!                                                ▼                     ▼
//!                                          ExportResult  ◄──────  Transport (HTTP)
//! ```
//!
//! Producers never block and never see delivery errors: overflow drops the
//! newest record and counts it, and every delivery outcome is reported
//! through an [`ExportResult`].
//!
//! # Example
//!
//! ```no_run
//! use telemetry_pipeline::{
//!     BatchProcessor, ExporterConfig, HttpExporter, JsonMarshaler, LogRecord, ProcessorConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = HttpExporter::<LogRecord, _>::new(&ExporterConfig::from_env()?, JsonMarshaler)?;
//! let processor = BatchProcessor::new(ProcessorConfig::from_env()?, exporter)?;
//!
//! processor.on_emit(LogRecord::new("service started"));
//!
//! processor.shutdown().wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod export_result;
pub mod exporter;
pub mod headers;
pub mod processor;
pub mod record;
pub mod retry;
pub mod sender;
pub mod transport;

pub use clock::{Clock, TokioClock};
pub use config::{ExporterConfig, ProcessorConfig};
pub use error::{ConfigError, ExportError};
pub use export_result::{ExportResult, Outcome};
pub use exporter::{
    Exporter, HttpExporter, InMemoryExporter, JsonMarshaler, MarshaledBatch, Marshaler,
    NoopExporter,
};
pub use headers::{HeaderSource, Headers, StaticHeaders};
pub use processor::{BatchProcessor, ProcessorMetrics, ProcessorState};
pub use record::{AttributeError, AttributeValue, LogRecord, Severity};
pub use retry::RetryPolicy;
pub use sender::{BytesPayload, Compression, PayloadProducer, RetryingSender, SenderMetrics};
pub use transport::{HttpTransport, Transport, TransportBoxed, TransportRequest, TransportResponse};

pub use batch_queue::Metrics as QueueMetrics;
