// src/models/payload.rs

//! Raw upstream response shapes.
//!
//! Upstream has moved the item list around release to release: under
//! `data.item`, under `data.items`, as `data` itself, as the whole body,
//! and (for score lines) as a JSON document encoded inside the `data`
//! string. All of that is resolved here, once.

use serde_json::{Map, Value};

/// Tagged view of a raw upstream value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(Map<String, Value>),
    List(Vec<Value>),
    /// A string that is expected to hold a JSON document.
    Encoded(String),
    Unrecognized(Value),
}

impl Payload {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(map),
            Value::Array(items) => Self::List(items),
            Value::String(s) => Self::Encoded(s),
            other => Self::Unrecognized(other),
        }
    }

    /// Decode an `Encoded` payload one level. Anything that does not parse
    /// into an object or list is `Unrecognized`.
    pub fn resolve(self) -> Self {
        match self {
            Self::Encoded(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value @ (Value::Object(_) | Value::Array(_))) => Self::classify(value),
                Ok(other) => Self::Unrecognized(other),
                Err(_) => Self::Unrecognized(Value::String(text)),
            },
            other => other,
        }
    }

    /// Item list held by this payload, looking under `list_keys` (in order)
    /// when it is an object.
    ///
    /// A key present with `null` counts as an empty list. `None` means the
    /// expected list is not there at all.
    pub fn into_items(self, list_keys: &[String]) -> Option<Vec<Value>> {
        match self.resolve() {
            Self::List(items) => Some(items),
            Self::Object(mut map) => list_keys.iter().find_map(|key| match map.remove(key) {
                Some(Value::Array(items)) => Some(items),
                Some(Value::Null) => Some(Vec::new()),
                _ => None,
            }),
            _ => None,
        }
    }
}

/// Extract the item list from a full response body.
///
/// `None` is the partial-data case: the body parsed but the list is not
/// where any known shape puts it. Callers treat it as zero items.
pub fn extract_items(body: &Value, list_keys: &[String]) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => {
            let data = map.get("data")?;
            Payload::classify(data.clone()).into_items(list_keys)
        }
        _ => None,
    }
}

/// The `data` member of a body as a resolved payload.
pub fn data_payload(body: &Value) -> Option<Payload> {
    body.get("data")
        .cloned()
        .map(|data| Payload::classify(data).resolve())
}
