use std::collections::BTreeMap;

use crate::encode;

/// A string-keyed attribute map, the way every markup object carries its
/// free-form metadata.
///
/// Keys are kept in sorted order so linearization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    inner: BTreeMap<String, String>,
}

impl AttributeMap {
    pub fn new() -> Self {
        AttributeMap::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(|v| v.as_str())
    }

    /// Set an attribute, returning the previous value if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.inner.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Copy every attribute of `other` into this map, overwriting on clash.
    pub fn merge(&mut self, other: &AttributeMap) {
        for (name, value) in other.iter() {
            self.inner.insert(name.to_string(), value.to_string());
        }
    }

    /// Linearize to the `name<value>` form used in the tabular sections.
    pub fn linearize(&self) -> String {
        encode::linearize(self.iter())
    }

    /// Parse a linearized `name<value>` string.
    pub fn parse(s: &str) -> AttributeMap {
        let mut map = AttributeMap::new();
        for (name, value) in encode::parse_linearized(s) {
            map.inner.insert(name, value);
        }
        map
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        AttributeMap {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
