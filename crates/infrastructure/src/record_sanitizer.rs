//! Payload sanitation for key-value writes.
//!
//! The KV client only round-trips plain JSON scalars: every timestamp must
//! already be an ISO-8601 string, absent values must be dropped rather
//! than stored as nulls, and unbounded recursion must be cut off. Every
//! repository in this crate passes its payloads through [`sanitize_value`]
//! before serialization.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Maximum nesting depth preserved in sanitized payloads.
pub const SANITIZE_MAX_DEPTH: usize = 16;

/// Formats one timestamp the way sanitized payloads store it.
#[must_use]
pub fn iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

/// Normalizes one JSON payload for a KV write.
///
/// Object entries with `null` values are dropped, nesting beyond
/// [`SANITIZE_MAX_DEPTH`] is truncated to `null`, and non-finite numbers
/// become strings so the downstream client never sees an unmarshalable
/// value.
#[must_use]
pub fn sanitize_value(value: &Value) -> Value {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Value {
    if depth >= SANITIZE_MAX_DEPTH {
        return Value::Null;
    }

    match value {
        Value::Object(entries) => {
            let mut sanitized = Map::with_capacity(entries.len());
            for (key, entry) in entries {
                if entry.is_null() {
                    continue;
                }

                let entry = sanitize_at_depth(entry, depth + 1);
                if !entry.is_null() {
                    sanitized.insert(key.clone(), entry);
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_at_depth(item, depth + 1))
                .collect(),
        ),
        Value::Number(number) => {
            if let Some(float) = number.as_f64()
                && !float.is_finite()
            {
                return Value::String(float.to_string());
            }
            Value::Number(number.clone())
        }
        other => other.clone(),
    }
}
