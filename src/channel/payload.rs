//! Telemetry payloads
//!
//! The channel never interprets a payload's shape; it only decodes the JSON
//! body and records where and when it arrived.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One decoded message from the live topic
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPayload {
    topic: String,
    value: Arc<Value>,
    received_at: DateTime<Utc>,
}

impl TelemetryPayload {
    /// Wrap an already-decoded value
    pub fn new(topic: impl Into<String>, value: Value) -> Self {
        Self {
            topic: topic.into(),
            value: Arc::new(value),
            received_at: Utc::now(),
        }
    }

    /// Decode a message body
    pub fn parse(topic: &str, body: &str) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_str(body)?;
        Ok(Self::new(topic, value))
    }

    /// Shorthand topic the payload arrived on (e.g. `live_now`)
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The decoded JSON value, verbatim
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Top-level keys in canonical form; see [`normalize_keys`]
    pub fn normalized(&self) -> Value {
        normalize_keys(&self.value)
    }
}

/// Canonical key form used by the dashboard widgets.
///
/// Subscript digits become ASCII digits, whitespace, `_` and `-` are removed,
/// and the result is lowercased: `"PO₄ - P"` becomes `"po4p"`.
pub fn canonical_key(key: &str) -> String {
    key.chars()
        .filter_map(|c| match c {
            '₀'..='₉' => char::from_digit(c as u32 - '₀' as u32, 10),
            c if c.is_whitespace() || c == '_' || c == '-' => None,
            c => Some(c),
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Rewrite the top-level keys of a JSON object with [`canonical_key`].
///
/// Values are kept as-is. Anything other than an object yields an empty
/// object. When two keys collapse to the same canonical form the later one
/// wins.
pub fn normalize_keys(value: &Value) -> Value {
    let mut out = Map::new();
    if let Value::Object(map) = value {
        for (k, v) in map {
            out.insert(canonical_key(k), v.clone());
        }
    }
    Value::Object(out)
}
