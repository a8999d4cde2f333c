// src/models/record.rs

//! Canonical record, field and entity identifier types.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Identifier of a harvested entity (school, major, ...).
///
/// Upstream sends ids as either JSON integers or strings depending on the
/// endpoint, so both normalize to the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extract an id from a raw JSON value. Blank strings, floats, `null`
    /// and containers are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// JSON form used when the id is written into a record: numeric ids
    /// go back out as integers.
    pub fn to_value(&self) -> Value {
        match self.0.parse::<u64>() {
            Ok(n) if n.to_string() == self.0 => Value::from(n),
            _ => Value::String(self.0.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// One canonical field value.
///
/// `Unknown` means "this source did not provide the field". A provided
/// value is never JSON `null`: upstream `null` collapses to `Unknown`,
/// which is what makes the snapshot encoding (`Unknown` ⇄ `null`)
/// lossless.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Field {
    #[default]
    Unknown,
    Value(Value),
}

impl Field {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Unknown => None,
            Self::Value(v) => Some(v),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Unknown,
            other => Self::Value(other),
        }
    }
}

impl From<Field> for Value {
    fn from(field: Field) -> Self {
        match field {
            Field::Unknown => Value::Null,
            Field::Value(v) => v,
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unknown => serializer.serialize_none(),
            Self::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Field::from)
    }
}

/// A canonical record: semantic field name to [`Field`], in schema order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field slot, `None` when the record has no such field at all.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Provided value of a field, `None` when missing or unknown.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Field::as_value)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    /// Set a field, replacing any previous value in place.
    pub fn set(&mut self, name: impl Into<String>, field: Field) {
        self.fields.insert(name.into(), field);
    }

    /// Set a provided value (a `null` becomes `Unknown`).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.set(name, Field::from(value.into()));
    }

    /// Overlay every provided field of `other` onto `self`.
    ///
    /// Fields `other` leaves unknown do not touch `self`. Returns the
    /// number of fields written.
    pub fn overlay(&mut self, other: &Record) -> usize {
        let mut written = 0;
        for (name, field) in &other.fields {
            if field.is_unknown() {
                continue;
            }
            self.fields.insert(name.clone(), field.clone());
            written += 1;
        }
        written
    }

    /// Read the entity id stored in `id_field`.
    pub fn id(&self, id_field: &str) -> Option<EntityId> {
        self.value(id_field).and_then(EntityId::from_value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Field)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Field)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_id_accepts_strings_and_integers() {
        assert_eq!(EntityId::from_value(&json!(31)), Some(EntityId::new("31")));
        assert_eq!(
            EntityId::from_value(&json!(" 31 ")),
            Some(EntityId::new("31"))
        );
        assert_eq!(EntityId::from_value(&json!("")), None);
        assert_eq!(EntityId::from_value(&json!(null)), None);
        assert_eq!(EntityId::from_value(&json!(3.5)), None);
    }

    #[test]
    fn entity_id_writes_numeric_ids_as_integers() {
        assert_eq!(EntityId::new("31").to_value(), json!(31));
        assert_eq!(EntityId::new("g-7").to_value(), json!("g-7"));
        assert_eq!(EntityId::new("007").to_value(), json!("007"));
    }

    #[test]
    fn null_collapses_to_unknown() {
        let mut record = Record::new();
        record.insert("email", Value::Null);
        assert_eq!(record.get("email"), Some(&Field::Unknown));
        assert_eq!(record.value("email"), None);
    }

    #[test]
    fn unknown_is_distinct_from_empty_string() {
        let mut record = Record::new();
        record.insert("code", "");
        record.set("name", Field::Unknown);
        assert_eq!(record.str("code"), Some(""));
        assert!(record.get("name").is_some_and(Field::is_unknown));
    }

    #[test]
    fn overlay_skips_unknown_fields() {
        let mut base = Record::new();
        base.insert("name", "A");
        base.insert("rank", 5);

        let mut detail = Record::new();
        detail.insert("rank", 3);
        detail.set("name", Field::Unknown);

        assert_eq!(base.overlay(&detail), 1);
        assert_eq!(base.str("name"), Some("A"));
        assert_eq!(base.value("rank"), Some(&json!(3)));
    }

    #[test]
    fn serializes_unknown_as_null() {
        let record: Record = [
            ("school_id", Field::from(json!(31))),
            ("email", Field::Unknown),
        ]
        .into_iter()
        .collect();

        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text, r#"{"school_id":31,"email":null}"#);

        let back: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
