//! Log record type used by the demo and tests.
//!
//! The pipeline itself treats records as opaque; any `Send + 'static` type
//! works. `LogRecord` serializes to an OTLP-flavoured JSON shape.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Attribute payload, tagged by type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeValue {
    StringValue(String),
    BoolValue(bool),
    IntValue(i64),
    DoubleValue(f64),
    ArrayValue(Vec<AttributeValue>),
}

/// Why a JSON value has no attribute representation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributeError {
    #[error("null is not a valid attribute value")]
    Null,
    #[error("objects are not valid attribute values")]
    Object,
    #[error("number {0} does not fit an i64 or f64")]
    Number(String),
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::StringValue(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::StringValue(v.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::BoolValue(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::IntValue(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::DoubleValue(v)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(v: Vec<T>) -> Self {
        Self::ArrayValue(v.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = AttributeError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Null => Err(AttributeError::Null),
            Value::Bool(b) => Ok(Self::BoolValue(b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::IntValue)
                .or_else(|| n.as_f64().map(Self::DoubleValue))
                .ok_or_else(|| AttributeError::Number(n.to_string())),
            Value::String(s) => Ok(Self::StringValue(s)),
            Value::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::ArrayValue),
            Value::Object(_) => Err(AttributeError::Object),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

/// One log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub time_unix_nano: u64,
    pub severity_text: Severity,
    pub body: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl LogRecord {
    /// A record stamped with the current wall-clock time.
    pub fn new(body: impl Into<String>) -> Self {
        let time_unix_nano = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            time_unix_nano,
            severity_text: Severity::default(),
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity_text = severity;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds a JSON-typed attribute, rejecting values with no attribute form.
    pub fn try_with_json_attribute(
        self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<Self, AttributeError> {
        let value = AttributeValue::try_from(value)?;
        Ok(self.with_attribute(key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        assert_eq!(AttributeValue::try_from(json!(3)), Ok(AttributeValue::IntValue(3)));
        assert_eq!(
            AttributeValue::try_from(json!(2.5)),
            Ok(AttributeValue::DoubleValue(2.5))
        );
        assert_eq!(
            AttributeValue::try_from(json!(["a", true])),
            Ok(AttributeValue::ArrayValue(vec!["a".into(), true.into()]))
        );
        assert_eq!(AttributeValue::try_from(json!(null)), Err(AttributeError::Null));
        assert_eq!(
            AttributeValue::try_from(json!({"nested": 1})),
            Err(AttributeError::Object)
        );
        assert_eq!(
            AttributeValue::try_from(json!([1, null])),
            Err(AttributeError::Null)
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut record = LogRecord::new("user signed in")
            .with_severity(Severity::Warn)
            .with_attribute("user.id", 42i64)
            .with_attribute("tags", vec!["a", "b"]);
        record.time_unix_nano = 1;

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "timeUnixNano": 1,
                "severityText": "WARN",
                "body": "user signed in",
                "attributes": {
                    "tags": {"arrayValue": [{"stringValue": "a"}, {"stringValue": "b"}]},
                    "user.id": {"intValue": 42}
                }
            })
        );
    }

    #[test]
    fn test_try_with_json_attribute() {
        let record = LogRecord::new("x");
        assert!(record.clone().try_with_json_attribute("ok", json!("v")).is_ok());
        assert_eq!(
            record.try_with_json_attribute("bad", json!({})),
            Err(AttributeError::Object)
        );
    }
}
