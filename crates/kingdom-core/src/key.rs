//! Metadata cache keys.
//!
//! A key identifies an `(action id, parameters)` pair. Parameters are
//! serialized canonically so that two payloads that are deeply equal
//! regardless of object key order always map to the same key:
//!
//! - object entries are sorted by key at every nesting level
//! - arrays keep their original order
//! - primitives use standard JSON text
//! - missing, `null` or empty parameters serialize as `{}`
//!
//! The resulting key has the form `"{action_id}:{canonical_params}"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Canonical representation of absent parameters.
pub const EMPTY_PARAMS: &str = "{}";

/// Deterministic cache key for an action and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataKey(String);

impl MetadataKey {
    /// Borrow the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key and return the text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MetadataKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build the cache key for `action_id` with the given parameters.
pub fn create_metadata_key(action_id: &str, params: Option<&Value>) -> MetadataKey {
    let serialized = match params {
        None | Some(Value::Null) => EMPTY_PARAMS.to_string(),
        Some(value) => canonical_json(value),
    };
    MetadataKey(format!("{action_id}:{serialized}"))
}

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_primitive(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        primitive => write_primitive(primitive, out),
    }
}

fn write_primitive(value: &Value, out: &mut String) {
    // Display on a primitive Value is its compact JSON text.
    out.push_str(&value.to_string());
}
