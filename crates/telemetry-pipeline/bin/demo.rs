//! # Telemetry Pipeline Demo
//!
//! Runs the full pipeline end to end: producer threads emit log records into a
//! `BatchProcessor`, which batches them and ships each batch either to an
//! OTLP/HTTP collector or, in dry-run mode, to an in-memory exporter.
//!
//! Configuration comes from the standard environment variables
//! (`OTEL_BSP_*`, `OTEL_EXPORTER_OTLP_*`); log verbosity from `RUST_LOG`.
//!
//! ## Running
//!
//! ```bash
//! # No collector needed: batches are kept in memory
//! cargo run -p telemetry-pipeline --bin demo -- --dry-run
//!
//! # Against a local collector, gzip enabled
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4318/v1/logs \
//! OTEL_EXPORTER_OTLP_COMPRESSION=gzip \
//! RUST_LOG=telemetry_pipeline=debug \
//! cargo run -p telemetry-pipeline --bin demo
//!
//! # Fewer records
//! cargo run -p telemetry-pipeline --bin demo -- --dry-run --quick
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use telemetry_pipeline::{
    BatchProcessor, Exporter, ExporterConfig, HttpExporter, InMemoryExporter, JsonMarshaler,
    LogRecord, ProcessorConfig, Severity,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
struct DemoOptions {
    producers: usize,
    records_per_producer: usize,
}

// =============================================================================
// PRODUCERS
// =============================================================================

fn emit_records(processor: &Arc<BatchProcessor<LogRecord>>, options: &DemoOptions) {
    let handles: Vec<_> = (0..options.producers)
        .map(|id| {
            let processor = Arc::clone(processor);
            let count = options.records_per_producer;
            thread::Builder::new()
                .name(format!("producer-{}", id))
                .spawn(move || {
                    for seq in 0..count {
                        let severity = if seq % 50 == 49 {
                            Severity::Error
                        } else {
                            Severity::Info
                        };
                        processor.on_emit(
                            LogRecord::new(format!("request {} handled", seq))
                                .with_severity(severity)
                                .with_attribute("producer.id", id as i64)
                                .with_attribute("sequence", seq as i64),
                        );
                        if seq % 100 == 0 {
                            thread::sleep(Duration::from_millis(1));
                        }
                    }
                })
        })
        .collect();

    for handle in handles {
        match handle {
            Ok(h) => {
                if h.join().is_err() {
                    error!("producer thread panicked");
                }
            }
            Err(e) => error!(error = %e, "failed to spawn producer thread"),
        }
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

async fn run_pipeline<E>(
    config: ProcessorConfig,
    exporter: E,
    options: &DemoOptions,
) -> Result<(), Box<dyn std::error::Error>>
where
    E: Exporter<LogRecord>,
{
    let processor = Arc::new(BatchProcessor::new(config, exporter)?);
    let started = Instant::now();

    // Producer threads are plain OS threads; keep them off the runtime workers.
    let producer_side = Arc::clone(&processor);
    let options = *options;
    tokio::task::spawn_blocking(move || emit_records(&producer_side, &options)).await?;
    info!(elapsed = ?started.elapsed(), "producers finished");

    let outcome = processor.shutdown().wait().await;
    let queue = processor.queue_metrics();
    let metrics = processor.metrics();

    info!(
        emitted = options.producers * options.records_per_producer,
        accepted = queue.enqueued,
        dropped_overflow = metrics.dropped_overflow(),
        dropped_after_shutdown = metrics.dropped_after_shutdown(),
        exported = metrics.records_exported(),
        batches = metrics.batches_exported(),
        failed_batches = metrics.export_failures(),
        timeouts = metrics.export_timeouts(),
        elapsed = ?started.elapsed(),
        "pipeline stopped"
    );

    if let Err(e) = outcome {
        error!(error = %e, "shutdown reported a failed export");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let quick = args.iter().any(|a| a == "--quick");

    let options = if quick {
        DemoOptions {
            producers: 2,
            records_per_producer: 500,
        }
    } else {
        DemoOptions {
            producers: 8,
            records_per_producer: 5_000,
        }
    };

    let processor_config = ProcessorConfig::from_env()?;
    info!(
        dry_run,
        producers = options.producers,
        records_per_producer = options.records_per_producer,
        max_queue_size = processor_config.max_queue_size,
        max_export_batch_size = processor_config.max_export_batch_size,
        "starting demo"
    );

    if dry_run {
        let exporter = InMemoryExporter::<LogRecord>::new();
        run_pipeline(processor_config, exporter.clone(), &options).await?;
        info!(
            batches = exporter.export_calls(),
            records = exporter.records().len(),
            "in-memory exporter contents"
        );
    } else {
        let exporter_config = ExporterConfig::from_env()?;
        info!(
            endpoint = %exporter_config.endpoint,
            compression = ?exporter_config.compression,
            max_attempts = exporter_config.retry.max_attempts(),
            "exporting over HTTP"
        );
        let exporter: HttpExporter<LogRecord, _> = HttpExporter::new(&exporter_config, JsonMarshaler)?;
        run_pipeline(processor_config, exporter, &options).await?;
    }

    Ok(())
}
