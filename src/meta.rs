//! Open-ended metadata attached to registers, bits and pins.
//!
//! Metadata is resolved through a chain of providers, from the process-wide
//! defaults in [`Config`](crate::Config) to the instance itself. Each layer is
//! merged onto the previous one with [`Metadata::merged_with`].

use std::collections::{BTreeMap, btree_map};

use serde::{Deserialize, Serialize};

/// A tagged metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A boolean flag.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A string.
    Str(String),
    /// A list of values.
    List(Vec<Value>),
    /// A nested map. Maps merge per key instead of being replaced.
    Map(Metadata),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Metadata> for Value {
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

/// An ordered map of metadata keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a key, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the map holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates keys and values in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Returns `self` with `overlay` applied on top.
    ///
    /// Keys only present in `self` are inherited. Where both hold a
    /// [`Value::Map`] the maps are merged recursively; any other overlay
    /// value replaces the inherited one.
    #[must_use]
    pub fn merged_with(&self, overlay: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge(overlay);
        merged
    }

    /// In-place version of [`Metadata::merged_with`].
    pub fn merge(&mut self, overlay: &Self) {
        for (key, value) in &overlay.0 {
            match (self.0.get_mut(key), value) {
                (Some(Value::Map(base)), Value::Map(over)) => base.merge(over),
                _ => {
                    self.0.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Merges a chain of layers, least specific first.
    pub fn resolve<'a>(layers: impl IntoIterator<Item = &'a Self>) -> Self {
        layers.into_iter().fold(Self::new(), |mut acc, layer| {
            acc.merge(layer);
            acc
        })
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
