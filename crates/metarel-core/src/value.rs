//! Runtime values exchanged with the database.
//!
//! [`Value`] is the single dynamic value type flowing through the engine: filter
//! operands, bound statement parameters, row cells, and hydrated entity fields.
//! The `Json` variant marks a value that must be serialized to text and cast to
//! the JSON column type on write; `Map` carries nested entities after relation
//! hydration.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::data::DataMap;

/// A dynamically-typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL NULL / absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer. Entity ids are carried as this variant.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// A value destined for a JSON-typed column. Serialized to text and cast
    /// (`$n::jsonb`) when compiled into a statement.
    Json(serde_json::Value),
    /// Array of values. Compiles to a single array parameter for `in`/`notIn`.
    Array(Vec<Value>),
    /// Nested key-value data: a hydrated related entity or an entity passed in
    /// on write (`{"id": 3}` or a full new entity).
    Map(DataMap),
}

impl Value {
    /// Whether this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// As a boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// As an integer, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// As a string slice, if this is `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// As an array slice, if this is an `Array`.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// As nested data, if this is a `Map`.
    pub fn as_map(&self) -> Option<&DataMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert to a `serde_json::Value`, losing the `Json` marker.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Build a value from a `serde_json::Value`.
    ///
    /// Objects become `Map`, never `Json`: the JSON-column marker is applied by
    /// the entity mapping layer based on property metadata, not inferred from
    /// the wire shape.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(json))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<DataMap> for Value {
    fn from(v: DataMap) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(serde_json::json!(42)), Value::Int(42));
        assert_eq!(Value::from_json(serde_json::json!(1.5)), Value::Float(1.5));
    }

    #[test]
    fn test_from_json_object_becomes_map() {
        let value = Value::from_json(serde_json::json!({"id": 3, "name": "ops"}));
        let map = value.as_map().expect("map");
        assert_eq!(map.get("id"), Some(&Value::Int(3)));
        assert_eq!(map.get("name"), Some(&Value::Text("ops".to_string())));
    }

    #[test]
    fn test_json_round_trip_preserves_order_of_kinds() {
        let value = Value::Array(vec![Value::Null, Value::Bool(true), Value::Int(7)]);
        let json = value.to_json();
        assert_eq!(Value::from_json(json), value);
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::Int(5));
    }
}
