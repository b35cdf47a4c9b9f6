//! Processor and exporter configuration.
//!
//! Both structs start from [`Default`], can be adjusted with `with_*`
//! methods, and can be overlaid with the standard `OTEL_*` environment
//! variables. Durations in the environment are milliseconds.

use crate::error::ConfigError;
use crate::headers::{parse_header_list, Headers};
use crate::retry::RetryPolicy;
use crate::sender::Compression;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
pub const ENV_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
pub const ENV_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
pub const ENV_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";
pub const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
pub const ENV_COMPRESSION: &str = "OTEL_EXPORTER_OTLP_COMPRESSION";
pub const ENV_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";

/// Batch processor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Upper bound on the time a record waits before a periodic export.
    pub scheduled_delay: Duration,
    /// Buffer capacity; records beyond it are dropped.
    pub max_queue_size: usize,
    /// Largest batch handed to one export call.
    pub max_export_batch_size: usize,
    /// Buffered count that wakes the export loop early.
    /// `None` means `max_export_batch_size`.
    pub batch_size_threshold: Option<usize>,
    /// How long the loop waits for one export before counting it failed.
    pub export_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            scheduled_delay: Duration::from_secs(5),
            max_queue_size: 2048,
            max_export_batch_size: 512,
            batch_size_threshold: None,
            export_timeout: Duration::from_secs(30),
        }
    }
}

impl ProcessorConfig {
    pub fn with_scheduled_delay(mut self, delay: Duration) -> Self {
        self.scheduled_delay = delay;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    pub fn with_batch_size_threshold(mut self, threshold: usize) -> Self {
        self.batch_size_threshold = Some(threshold);
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn batch_size_threshold(&self) -> usize {
        self.batch_size_threshold
            .unwrap_or(self.max_export_batch_size)
    }

    /// Rejects zero sizes and durations; clamps sizes that exceed the queue.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::out_of_range("max_queue_size", "must be positive"));
        }
        if self.max_export_batch_size == 0 {
            return Err(ConfigError::out_of_range(
                "max_export_batch_size",
                "must be positive",
            ));
        }
        if self.batch_size_threshold == Some(0) {
            return Err(ConfigError::out_of_range(
                "batch_size_threshold",
                "must be positive",
            ));
        }
        if self.scheduled_delay.is_zero() {
            return Err(ConfigError::out_of_range("scheduled_delay", "must be positive"));
        }
        if self.export_timeout.is_zero() {
            return Err(ConfigError::out_of_range("export_timeout", "must be positive"));
        }

        if self.max_export_batch_size > self.max_queue_size {
            warn!(
                max_export_batch_size = self.max_export_batch_size,
                max_queue_size = self.max_queue_size,
                "max_export_batch_size exceeds max_queue_size, clamping"
            );
            self.max_export_batch_size = self.max_queue_size;
        }
        if let Some(threshold) = self.batch_size_threshold {
            if threshold > self.max_queue_size {
                warn!(
                    threshold,
                    max_queue_size = self.max_queue_size,
                    "batch_size_threshold exceeds max_queue_size, clamping"
                );
                self.batch_size_threshold = Some(self.max_queue_size);
            }
        }
        Ok(self)
    }

    /// Defaults overlaid with `OTEL_BSP_*` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_SCHEDULE_DELAY)? {
            config.scheduled_delay = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_QUEUE_SIZE)? {
            config.max_queue_size = size;
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_EXPORT_BATCH_SIZE)? {
            config.max_export_batch_size = size;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_EXPORT_TIMEOUT)? {
            config.export_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// HTTP exporter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    /// Full URL the batches are POSTed to.
    pub endpoint: String,
    pub headers: Headers,
    pub compression: Compression,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318/v1/logs".to_string(),
            headers: Headers::new(),
            compression: Compression::None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl ExporterConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Defaults overlaid with `OTEL_EXPORTER_OTLP_*` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(endpoint) = non_empty(&lookup, ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }
        if let Some(raw) = non_empty(&lookup, ENV_HEADERS) {
            config.headers = parse_header_list(&raw).map_err(|_| ConfigError::InvalidValue {
                key: ENV_HEADERS.to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = non_empty(&lookup, ENV_COMPRESSION) {
            config.compression = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_COMPRESSION.to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_TIMEOUT)? {
            config.timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key)
        .map(|raw| {
            raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_processor_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.scheduled_delay, Duration::from_secs(5));
        assert_eq!(config.max_queue_size, 2048);
        assert_eq!(config.max_export_batch_size, 512);
        assert_eq!(config.batch_size_threshold(), 512);
        assert_eq!(config.export_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_threshold_follows_batch_size_unless_set() {
        let config = ProcessorConfig::default().with_max_export_batch_size(64);
        assert_eq!(config.batch_size_threshold(), 64);
        assert_eq!(config.with_batch_size_threshold(5).batch_size_threshold(), 5);
    }

    #[test]
    fn test_validate_clamps_batch_size_to_queue() {
        let config = ProcessorConfig::default()
            .with_max_queue_size(100)
            .with_batch_size_threshold(500)
            .validate()
            .unwrap();
        assert_eq!(config.max_export_batch_size, 100);
        assert_eq!(config.batch_size_threshold(), 100);
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(ProcessorConfig::default().with_max_queue_size(0).validate().is_err());
        assert!(ProcessorConfig::default()
            .with_max_export_batch_size(0)
            .validate()
            .is_err());
        assert!(ProcessorConfig::default()
            .with_batch_size_threshold(0)
            .validate()
            .is_err());
        assert!(ProcessorConfig::default()
            .with_scheduled_delay(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_processor_from_lookup() {
        let config = ProcessorConfig::from_lookup(lookup(&[
            (ENV_SCHEDULE_DELAY, "250"),
            (ENV_MAX_QUEUE_SIZE, "10"),
            (ENV_MAX_EXPORT_BATCH_SIZE, " "),
            (ENV_EXPORT_TIMEOUT, "1000"),
        ]))
        .unwrap();
        assert_eq!(config.scheduled_delay, Duration::from_millis(250));
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.max_export_batch_size, 512);
        assert_eq!(config.export_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_processor_from_lookup_rejects_garbage() {
        let err = ProcessorConfig::from_lookup(lookup(&[(ENV_MAX_QUEUE_SIZE, "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_MAX_QUEUE_SIZE.to_string(),
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn test_exporter_from_lookup() {
        let config = ExporterConfig::from_lookup(lookup(&[
            (ENV_ENDPOINT, "https://collector.example.com/v1/logs"),
            (ENV_HEADERS, "api-key=abc,tenant=t1"),
            (ENV_COMPRESSION, "gzip"),
            (ENV_TIMEOUT, "2500"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "https://collector.example.com/v1/logs");
        assert_eq!(config.headers["api-key"], "abc");
        assert_eq!(config.headers["tenant"], "t1");
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_exporter_from_lookup_rejects_bad_compression() {
        assert!(ExporterConfig::from_lookup(lookup(&[(ENV_COMPRESSION, "zstd")])).is_err());
        assert!(ExporterConfig::from_lookup(lookup(&[(ENV_HEADERS, "broken")])).is_err());
    }

    #[test]
    fn test_exporter_from_lookup_rejects_illegal_header() {
        let result = ExporterConfig::from_lookup(lookup(&[(ENV_HEADERS, "bad header=v")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key, .. }) if key == ENV_HEADERS
        ));
    }
}
