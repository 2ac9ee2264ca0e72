//! Attribute namespaces and the computed-attribute registry.
//!
//! A [`Namespace`] holds the plain attributes of a target module or a
//! loaded source. Computed attributes live beside it in a
//! [`ComputedRegistry`]; attribute lookup checks the namespace first and
//! falls through to the registry, an explicit lookup chain rather than a
//! dynamic attribute hook.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::computed::ComputedAttr;

/// A named, mutable mapping from identifier to value.
///
/// Backed by a `BTreeMap` so iteration order is stable for deterministic
/// tests and display.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    name: String,
    attrs: BTreeMap<String, Value>,
}

impl Namespace {
    /// Create an empty namespace owned by `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// The owning module or source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Set an attribute, replacing any previous value wholesale.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.attrs.remove(name)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Iterate attributes in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attrs.iter()
    }

    /// Attribute-wise equality, ignoring the namespace names.
    pub fn attribute_equal(&self, other: &Namespace) -> bool {
        self.attrs == other.attrs
    }
}

/// Per-target map of computed attributes, consulted when plain attribute
/// lookup misses.
#[derive(Debug, Clone, Default)]
pub struct ComputedRegistry {
    entries: BTreeMap<String, Arc<ComputedAttr>>,
}

impl ComputedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ComputedAttr>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Register a computed attribute, replacing any previous registration.
    pub fn insert(&mut self, name: impl Into<String>, attr: Arc<ComputedAttr>) {
        self.entries.insert(name.into(), attr);
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<ComputedAttr>> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate registrations in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<ComputedAttr>)> {
        self.entries.iter()
    }
}
