//! Ordered key-value data containers.
//!
//! [`DataMap`] is the single container behind both rows and entities. The two
//! aliases document the key namespace each layer speaks:
//!
//! - [`Row`] — keys are **physical column names**, as stored/retrieved from one
//!   table. This is what the row-level accessor and the query builder see.
//! - [`Entity`] — keys are **logical property codes**, as exposed to callers,
//!   with relation-valued keys holding nested entities after hydration.
//!
//! The boundary between the two namespaces is enforced at the entity mapping
//! layer: codes in, columns out.

use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Physical-column-keyed data for one table.
pub type Row = DataMap;

/// Logical-property-keyed data exposed to callers.
pub type Entity = DataMap;

/// An insertion-ordered string-keyed value map.
///
/// Keys are unique; inserting an existing key replaces the value in place,
/// preserving the original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataMap {
    entries: Vec<(String, Value)>,
}

impl DataMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert a value, replacing any existing value for the key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// The `id` value, if present.
    ///
    /// Both rows and entities use the literal `id` key for the primary key.
    pub fn id(&self) -> Option<&Value> {
        self.get("id")
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Copy every entry of `other` into this map (replace on key collision).
    pub fn merge(&mut self, other: &DataMap) {
        for (key, value) in other.iter() {
            self.insert(key, value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = DataMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K: Into<String>, V: Into<Value>> From<Vec<(K, V)>> for DataMap {
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for DataMap {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for DataMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DataMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DataMapVisitor;

        impl<'de> Visitor<'de> for DataMapVisitor {
            type Value = DataMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string-keyed object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = DataMap::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(DataMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order() {
        let mut map = DataMap::new();
        map.insert("b", 2i64);
        map.insert("a", 1i64);
        map.insert("b", 3i64);
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_remove() {
        let mut map: DataMap = vec![("a", 1i64), ("b", 2i64)].into();
        assert_eq!(map.remove("a"), Some(Value::Int(1)));
        assert_eq!(map.remove("a"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_merge_replaces() {
        let mut left: DataMap = vec![("a", 1i64), ("b", 2i64)].into();
        let right: DataMap = vec![("b", 9i64), ("c", 3i64)].into();
        left.merge(&right);
        assert_eq!(left.get("b"), Some(&Value::Int(9)));
        assert_eq!(left.get("c"), Some(&Value::Int(3)));
        assert_eq!(left.len(), 3);
    }

    #[test]
    fn test_serde_round_trip_keeps_order() {
        let map: DataMap = vec![("z", 1i64), ("a", 2i64)].into();
        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"{"z":1,"a":2}"#);
        let back: DataMap = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
    }
}
