//! Conversion between [`RecognizedFields`] and the flat `{name, value}`
//! metadata list of backends that only store opaque metadata.
//!
//! Falsy values are dropped when encoding, so they come back absent rather
//! than `false` or `""`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::RecognizedFields;

pub const RECOGNIZED_FIELD_NAMES: [&str; 4] = ["enabled", "action", "redirectFlow", "redirectNode"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataPair {
    pub name: String,
    pub value: Value,
}

impl MetadataPair {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Keep the recognized keys of `fields` whose value is truthy, in
/// [`RECOGNIZED_FIELD_NAMES`] order.
pub fn encode(fields: &Map<String, Value>) -> Vec<MetadataPair> {
    RECOGNIZED_FIELD_NAMES
        .iter()
        .filter_map(|name| {
            fields
                .get(*name)
                .filter(|value| is_truthy(value))
                .map(|value| MetadataPair::new(*name, value.clone()))
        })
        .collect()
}

/// Fold the list back into an object. Unrecognized names pass through; a
/// repeated name keeps its last value.
pub fn decode(pairs: &[MetadataPair]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|pair| (pair.name.clone(), pair.value.clone()))
        .collect()
}

pub fn encode_fields(fields: &RecognizedFields) -> Vec<MetadataPair> {
    match serde_json::to_value(fields) {
        Ok(Value::Object(map)) => encode(&map),
        _ => Vec::new(),
    }
}

/// Read the recognized fields out of a decoded metadata object.
///
/// Services that stringify metadata hand back `"true"` for `enabled`, which
/// is accepted alongside a real boolean.
pub fn fields_from_metadata(map: &Map<String, Value>) -> RecognizedFields {
    let enabled = match map.get("enabled") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    RecognizedFields {
        enabled,
        action: string_field(map, "action"),
        redirect_flow: string_field(map, "redirectFlow"),
        redirect_node: string_field(map, "redirectNode"),
    }
}

fn string_field(map: &Map<String, Value>, name: &str) -> Option<String> {
    match map.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}
