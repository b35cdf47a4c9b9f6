//! Per-attempt request headers.
//!
//! A [`HeaderSource`] is consulted before every delivery attempt so rotating
//! credentials are picked up by retries of an already-queued payload.

use crate::error::ConfigError;
use reqwest::header::{HeaderName, HeaderValue};
use std::collections::BTreeMap;

pub type Headers = BTreeMap<String, String>;

/// Supplies the headers for one delivery attempt. Shared across tasks.
pub trait HeaderSource: Send + Sync {
    fn current_headers(&self) -> Headers;
}

impl<F> HeaderSource for F
where
    F: Fn() -> Headers + Send + Sync,
{
    fn current_headers(&self) -> Headers {
        self()
    }
}

/// Fixed header set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticHeaders(Headers);

impl StaticHeaders {
    pub fn new(headers: Headers) -> Self {
        Self(headers)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl HeaderSource for StaticHeaders {
    fn current_headers(&self) -> Headers {
        self.0.clone()
    }
}

/// Checks that every entry is a legal HTTP header name and value.
pub fn validate_headers(headers: &Headers) -> Result<(), ConfigError> {
    for (name, value) in headers {
        let valid = HeaderName::from_bytes(name.as_bytes()).is_ok()
            && HeaderValue::from_str(value).is_ok();
        if !valid {
            return Err(ConfigError::InvalidValue {
                key: format!("header {:?}", name),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// Parses `key1=value1,key2=value2`.
///
/// Whitespace around keys and values is trimmed and empty entries are
/// skipped. Values may contain `=`. Names and values must be valid HTTP.
pub fn parse_header_list(raw: &str) -> Result<Headers, ConfigError> {
    let mut headers = Headers::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "header".to_string(),
                value: entry.to_string(),
            })?;
        headers.insert(key.to_string(), value.to_string());
    }
    validate_headers(&headers)?;
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_header_list() {
        let headers = parse_header_list(" api-key = secret , x-tenant=a=b,, ").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["api-key"], "secret");
        assert_eq!(headers["x-tenant"], "a=b");
    }

    #[test]
    fn test_parse_rejects_entries_without_key() {
        assert!(parse_header_list("novalue").is_err());
        assert!(parse_header_list("=value").is_err());
        assert!(parse_header_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_illegal_header_names_and_values() {
        assert!(matches!(
            parse_header_list("bad header=v"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(parse_header_list("x-ok=line\nbreak").is_err());
        assert!(validate_headers(&Headers::from([("x-ok".into(), "fine".into())])).is_ok());
    }

    #[test]
    fn test_closure_source_is_evaluated_each_time() {
        let counter = AtomicU32::new(0);
        let source = move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            Headers::from([("authorization".to_string(), format!("Bearer token-{}", n))])
        };
        assert_eq!(source.current_headers()["authorization"], "Bearer token-0");
        assert_eq!(source.current_headers()["authorization"], "Bearer token-1");
    }

    #[test]
    fn test_static_headers() {
        let source = StaticHeaders::default().with("a", "1").with("b", "2");
        assert_eq!(source.current_headers().len(), 2);
    }
}
