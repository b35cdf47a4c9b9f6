//! Retrying delivery of one marshaled payload.
//!
//! [`RetryingSender::send`] never blocks and never fails synchronously: the
//! delivery runs as a tracked task on the runtime captured at construction and
//! its outcome arrives through the returned [`ExportResult`].
//!
//! # Attempt loop
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ headers  = header_source.current_headers()                 │
//! │ body     = payload.write_to(..)   (gzip if enabled)        │
//! │ outcome  = transport.send(request)                         │
//! └────────────────────────────────────────────────────────────┘
//!        │ 2xx / other status / serialization error → resolve
//!        │ 429, 502, 503, 504 / transport error
//!        ▼
//!   attempts left? ── no ──► resolve with last failure
//!        │ yes
//!        ▼
//!   sleep(full_jitter(ceiling)), next ceiling, retry
//! ```
//!
//! The body is regenerated for every attempt; nothing from an earlier attempt
//! is replayed.

use crate::clock::{Clock, TokioClock};
use crate::error::{ConfigError, ExportError};
use crate::export_result::{ExportResult, Outcome};
use crate::headers::{HeaderSource, StaticHeaders};
use crate::retry::{full_jitter, RetryPolicy};
use crate::transport::{Transport, TransportBoxed, TransportRequest, TransportResponse};
use flate2::write::GzEncoder;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Statuses worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

#[inline]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Source of request bodies. Invoked once per attempt.
pub trait PayloadProducer: Send + Sync + 'static {
    /// Writes the full payload to `out`.
    fn write_to(&self, out: &mut dyn Write) -> io::Result<()>;

    fn content_type(&self) -> &str;

    /// Uncompressed size when known without producing the payload.
    fn content_length(&self) -> Option<usize> {
        None
    }
}

/// Raw bytes as a payload.
#[derive(Debug, Clone)]
pub struct BytesPayload {
    bytes: Arc<[u8]>,
    content_type: String,
}

impl BytesPayload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

impl PayloadProducer for BytesPayload {
    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.bytes)
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn content_length(&self) -> Option<usize> {
        Some(self.bytes.len())
    }
}

/// Request body compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    fn content_encoding(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
        }
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(ConfigError::InvalidValue {
                key: "compression".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct SenderMetrics {
    attempts: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl SenderMetrics {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &Outcome) {
        let counter = if outcome.is_ok() {
            &self.successes
        } else {
            &self.failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared with in-flight delivery tasks.
struct Shared {
    transport: Arc<dyn TransportBoxed>,
    headers: Arc<dyn HeaderSource>,
    policy: RetryPolicy,
    compression: Compression,
    clock: Arc<dyn Clock>,
    metrics: SenderMetrics,
}

impl Shared {
    async fn deliver(&self, payload: &dyn PayloadProducer) -> Outcome {
        let max_attempts = self.policy.max_attempts();
        let mut ceilings = self.policy.backoff_ceilings();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug_assert!(attempt <= max_attempts);
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = self.attempt(payload).await;
            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status),
                Err(e) => e.is_retryable(),
            };

            if !retryable || attempt >= max_attempts {
                return into_outcome(outcome);
            }

            let ceiling = ceilings.next().unwrap_or(self.policy.max_backoff());
            let delay = full_jitter(ceiling);
            debug!(
                transport = self.transport.name(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                last = %describe(&outcome),
                "retrying export"
            );
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            self.clock.sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        payload: &dyn PayloadProducer,
    ) -> Result<TransportResponse, ExportError> {
        let body = self
            .encode(payload)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        let request = TransportRequest {
            headers: self.headers.current_headers(),
            content_type: payload.content_type().to_string(),
            content_encoding: self.compression.content_encoding(),
            body,
        };
        self.transport.send_boxed(request).await
    }

    fn encode(&self, payload: &dyn PayloadProducer) -> io::Result<Vec<u8>> {
        let hint = payload.content_length().unwrap_or(0);
        match self.compression {
            Compression::None => {
                let mut body = Vec::with_capacity(hint);
                payload.write_to(&mut body)?;
                Ok(body)
            }
            Compression::Gzip => {
                let mut encoder =
                    GzEncoder::new(Vec::with_capacity(hint / 4), flate2::Compression::default());
                payload.write_to(&mut encoder)?;
                encoder.finish()
            }
        }
    }
}

fn into_outcome(outcome: Result<TransportResponse, ExportError>) -> Outcome {
    match outcome {
        Ok(response) if response.is_success() => Ok(()),
        Ok(response) => Err(ExportError::Status {
            status: response.status,
            message: response.message,
        }),
        Err(e) => Err(e),
    }
}

fn describe(outcome: &Result<TransportResponse, ExportError>) -> String {
    match outcome {
        Ok(response) => format!("status {}", response.status),
        Err(e) => e.to_string(),
    }
}

/// Builder for [`RetryingSender`].
pub struct SenderBuilder {
    transport: Arc<dyn TransportBoxed>,
    headers: Arc<dyn HeaderSource>,
    policy: RetryPolicy,
    compression: Compression,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
}

impl SenderBuilder {
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn headers(mut self, headers: impl HeaderSource + 'static) -> Self {
        self.headers = Arc::new(headers);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How long `shutdown` waits for cancelled tasks before releasing the transport.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Captures the current Tokio runtime.
    pub fn build(self) -> Result<RetryingSender, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Ok(RetryingSender {
            shared: Arc::new(Shared {
                transport: self.transport,
                headers: self.headers,
                policy: self.policy,
                compression: self.compression,
                clock: self.clock,
                metrics: SenderMetrics::default(),
            }),
            runtime,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            grace_period: self.grace_period,
            shutdown_result: OnceLock::new(),
        })
    }
}

/// Delivers payloads with retry, compression and cancellable shutdown.
pub struct RetryingSender {
    shared: Arc<Shared>,
    runtime: Handle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    grace_period: Duration,
    shutdown_result: OnceLock<ExportResult>,
}

impl RetryingSender {
    pub fn builder(transport: impl Transport) -> SenderBuilder {
        SenderBuilder {
            transport: Arc::new(transport),
            headers: Arc::new(StaticHeaders::default()),
            policy: RetryPolicy::default(),
            compression: Compression::None,
            clock: Arc::new(TokioClock),
            grace_period: Duration::from_secs(5),
        }
    }

    /// Starts delivering `payload` and returns immediately.
    ///
    /// After `shutdown` the result is already `Failure(Shutdown)`.
    pub fn send<P: PayloadProducer>(&self, payload: P) -> ExportResult {
        if self.cancel.is_cancelled() {
            return ExportResult::failure(ExportError::Shutdown);
        }

        let result = ExportResult::pending();
        let completion = result.clone();
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();

        self.tracker.spawn_on(
            async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(ExportError::Shutdown),
                    outcome = shared.deliver(&payload) => outcome,
                };
                if let Err(e) = &outcome {
                    warn!(transport = shared.transport.name(), error = %e, "export failed");
                }
                shared.metrics.record(&outcome);
                completion.resolve(outcome);
            },
            &self.runtime,
        );

        result
    }

    /// Cancels pending deliveries and releases the transport.
    ///
    /// In-flight results resolve `Failure(Shutdown)`. Idempotent: later calls
    /// return the first call's result.
    pub fn shutdown(&self) -> ExportResult {
        self.shutdown_result
            .get_or_init(|| {
                self.cancel.cancel();
                self.tracker.close();

                let result = ExportResult::pending();
                let completion = result.clone();
                let tracker = self.tracker.clone();
                let shared = Arc::clone(&self.shared);
                let grace = self.grace_period;

                self.runtime.spawn(async move {
                    tokio::select! {
                        () = tracker.wait() => {}
                        () = shared.clock.sleep(grace) => {
                            warn!(
                                in_flight = tracker.len(),
                                grace_ms = grace.as_millis() as u64,
                                "grace period elapsed, releasing transport"
                            );
                        }
                    }
                    shared.transport.shutdown();
                    completion.succeed();
                });

                result
            })
            .clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    pub fn metrics(&self) -> &SenderMetrics {
        &self.shared.metrics
    }
}

impl fmt::Debug for RetryingSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingSender")
            .field("transport", &self.shared.transport.name())
            .field("policy", &self.shared.policy)
            .field("compression", &self.shared.compression)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
