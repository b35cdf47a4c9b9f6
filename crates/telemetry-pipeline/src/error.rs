//! Error types for the export pipeline.
//!
//! Delivery failures never cross into producer threads: they are captured in
//! [`ExportResult`](crate::ExportResult)s as [`ExportError`]. Only
//! construction-time problems surface as [`ConfigError`].

use thiserror::Error;

/// Why an export (or flush, or shutdown) did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer failure (connection refused, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),
    /// The request could not be built (malformed header, for example).
    /// Retrying would fail the same way.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The collector answered with a non-success status.
    #[error("collector responded with status {status}: {message}")]
    Status { status: u16, message: String },
    /// The batch could not be turned into a payload.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The processor stopped waiting for the export.
    #[error("export operation timed out")]
    Timeout,
    /// The component was shut down before the operation completed.
    #[error("shutdown")]
    Shutdown,
}

impl ExportError {
    /// Transport failures are worth another attempt; everything else is final.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Invalid configuration, reported at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric setting is outside its allowed range.
    #[error("invalid {name}: {reason}")]
    OutOfRange { name: &'static str, reason: String },
    /// An environment value could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    /// The endpoint is not a usable URL.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
    /// The component needs a Tokio runtime and none is running.
    #[error("no Tokio runtime is running on this thread")]
    NoRuntime,
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(name: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            name,
            reason: reason.into(),
        }
    }
}
