use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::IngestError;
use crate::model::RawRow;

use super::{sha256_hex, ParsedBatch, OPTIONAL_COLUMNS, REQUIRED_COLUMNS};

/// Accepts a sequence of JSON objects with the same field contract as the
/// tabular adapter. `content_hash` is computed over a canonical
/// serialization (sorted keys, stable number formatting) of each event,
/// concatenated in document order, so two payloads with the same content but
/// different key order hash identically.
pub fn parse(events: &[Value]) -> Result<ParsedBatch, IngestError> {
    let mut canonical = String::new();
    let mut rows = Vec::with_capacity(events.len());

    for event in events {
        let obj = event
            .as_object()
            .ok_or_else(|| IngestError::BadRequest("event is not an object".to_string()))?;

        canonical.push_str(&canonicalize(event));
        canonical.push('\n');

        let mut fields = BTreeMap::new();
        for column in REQUIRED_COLUMNS.iter().chain(OPTIONAL_COLUMNS.iter()) {
            if let Some(value) = obj.get(*column) {
                fields.insert(column.to_string(), stringify(value));
            }
        }
        rows.push(RawRow { fields });
    }

    for required in REQUIRED_COLUMNS {
        if !events
            .iter()
            .filter_map(|e| e.as_object())
            .any(|o| o.contains_key(required))
        {
            return Err(IngestError::MissingRequiredColumn(required.to_string()));
        }
    }

    let content_hash = sha256_hex(canonical.as_bytes());
    Ok(ParsedBatch { rows, content_hash })
}

/// Sorted-key, stable-number-formatting JSON serialization of a single
/// value, used both for hashing and nowhere else (never logged, never
/// persisted).
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let parts: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", k, canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonicalize(other),
    }
}
