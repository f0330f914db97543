//! Hierarchical tagged registry
//!
//! The registry is the only data channel into hooks: every event populates
//! one with the standard keys (`network`, `optimizer`, `iterator`,
//! `trainer`, `epoch`, `iteration`, `runtime_millis`, `shared`) and hands
//! it to the hook together with a [`RegistryResolver`]. Registries nest
//! (dotted paths navigate children), optionally fall through to a parent,
//! and carry a tag set consulted by resolver queries.

mod resolver;
mod value;

pub use resolver::RegistryResolver;
pub use value::RegistryValue;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Ordered `String -> value` mapping with parent fall-through and tags
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, RegistryValue>,
    tags: BTreeSet<String>,
    parent: Option<Arc<Mutex<Registry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the given tags
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Attach a parent; lookups for absent keys fall through to it
    pub fn with_parent(mut self, parent: Arc<Mutex<Registry>>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<RegistryValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Local-or-parent lookup (single segment, no path navigation)
    pub fn get(&self, key: &str) -> Option<RegistryValue> {
        if let Some(value) = self.entries.get(key) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| {
            parent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
        })
    }

    /// Dotted-path lookup navigating nested registries
    ///
    /// `layers.conv1.weights` descends through the `layers` and `conv1`
    /// child registries before resolving `weights`.
    pub fn get_path(&self, path: &str) -> Option<RegistryValue> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.get(head)?;
        match rest {
            None => Some(value),
            Some(rest) => match value {
                RegistryValue::Registry(child) => child.get_path(rest),
                RegistryValue::SharedRegistry(child) => child
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_path(rest),
                _ => None,
            },
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<RegistryValue> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local keys in deterministic (sorted) order; parent keys excluded
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegistryValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Snapshot of every entry (tensors deep-copied, shared children frozen)
    pub fn snapshot_all(&self) -> Registry {
        let mut out = Registry::tagged(self.tags.iter().cloned());
        for (key, value) in &self.entries {
            out.entries.insert(key.clone(), value.snapshot_copy());
        }
        out
    }

    /// Snapshot of the subset of keys named by `keys`
    ///
    /// Keys containing `*` are expanded through the resolver against this
    /// registry before copying; plain keys may be dotted paths. Used to
    /// build the read-only registries handed to background hook buckets.
    pub fn snapshot_keys<'a, I>(&self, keys: I) -> Registry
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Registry::new();
        for key in keys {
            if key.contains('*') {
                for (resolved, value) in RegistryResolver::resolve_in(self, key) {
                    out.entries.insert(resolved, value.snapshot_copy());
                }
            } else if let Some(value) = self.get_path(key) {
                out.entries.insert(key.to_string(), value.snapshot_copy());
            }
        }
        out
    }
}
