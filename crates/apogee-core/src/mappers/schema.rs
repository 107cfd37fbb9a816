//! JSON-schema cleaning for Claude-variant tool declarations.
//!
//! The upstream's Claude surface accepts only a strict schema subset;
//! metaschema and reference keywords are stripped recursively. Note that
//! removing `$ref` drops the reference rather than expanding it; the
//! upstream rejects the keyword outright and referenced subschemas are
//! not reachable anyway once `$defs` is gone.

use serde_json::Value;

/// Keys the Claude upstream rejects anywhere in a tool schema.
const STRIPPED_KEYS: &[&str] =
    &["$schema", "additionalProperties", "strict", "default", "title", "$id", "$ref"];

/// Recursively remove unsupported keys. Idempotent.
pub fn clean_claude_schema(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in STRIPPED_KEYS {
                map.remove(*key);
            }
            for child in map.values_mut() {
                clean_claude_schema(child);
            }
        },
        Value::Array(items) => {
            for item in items {
                clean_claude_schema(item);
            }
        },
        _ => {},
    }
}
