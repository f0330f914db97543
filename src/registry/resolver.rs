//! Glob-style resolution over parented registry trees
//!
//! Patterns are dot-separated segment lists; a `*` segment matches any
//! single key at that level. `layers.*.*` therefore matches every
//! parameter of every layer. Matches carry their full dotted key so
//! callers can write results back or snapshot them.

use super::{Registry, RegistryValue};
use std::sync::{Arc, Mutex, PoisonError};

/// Resolves glob patterns against a shared root registry
pub struct RegistryResolver {
    root: Arc<Mutex<Registry>>,
}

impl RegistryResolver {
    pub fn new(root: Arc<Mutex<Registry>>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<Mutex<Registry>> {
        &self.root
    }

    /// All `(key, value)` pairs under the root matching `pattern`
    pub fn resolve(&self, pattern: &str) -> Vec<(String, RegistryValue)> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        Self::resolve_in(&root, pattern)
    }

    /// Nested registries under the root carrying `tag`, with their keys
    pub fn tagged(&self, tag: &str) -> Vec<(String, RegistryValue)> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        for (key, value) in root.iter() {
            let is_tagged = match value {
                RegistryValue::Registry(child) => child.has_tag(tag),
                RegistryValue::SharedRegistry(child) => child
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .has_tag(tag),
                _ => false,
            };
            if is_tagged {
                out.push((key.to_string(), value.clone()));
            }
        }
        out
    }

    /// Resolve `pattern` against an arbitrary registry (parent fall-through
    /// applies at every level)
    pub fn resolve_in(registry: &Registry, pattern: &str) -> Vec<(String, RegistryValue)> {
        let segments: Vec<&str> = pattern.split('.').collect();
        let mut out = Vec::new();
        walk(registry, &segments, String::new(), &mut out);
        out
    }
}

fn segment_matches(pattern: &str, key: &str) -> bool {
    pattern == "*" || pattern == key
}

fn walk(
    registry: &Registry,
    segments: &[&str],
    prefix: String,
    out: &mut Vec<(String, RegistryValue)>,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    for (key, value) in registry.iter() {
        if !segment_matches(head, key) {
            continue;
        }
        let full_key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        if rest.is_empty() {
            out.push((full_key, value.clone()));
            continue;
        }
        match value {
            RegistryValue::Registry(child) => walk(child, rest, full_key, out),
            RegistryValue::SharedRegistry(child) => {
                let child = child.lock().unwrap_or_else(PoisonError::into_inner);
                walk(&child, rest, full_key, out);
            }
            _ => {}
        }
    }
    // Parent entries participate when not shadowed by a local key
    if let Some(parent_matches) = parent_walk(registry, segments, &prefix) {
        for (key, value) in parent_matches {
            if !out.iter().any(|(k, _)| *k == key) {
                out.push((key, value));
            }
        }
    }
}

fn parent_walk(
    registry: &Registry,
    segments: &[&str],
    prefix: &str,
) -> Option<Vec<(String, RegistryValue)>> {
    let parent = registry.parent.as_ref()?;
    let parent = parent.lock().unwrap_or_else(PoisonError::into_inner);
    let mut out = Vec::new();
    walk(&parent, segments, prefix.to_string(), &mut out);
    Some(out)
}
