/// Dotted-path diffs over the context document
///
/// `set` assigns into nested objects, creating missing intermediate objects
/// (and replacing non-object intermediates). `unset` removes a leaf and does
/// nothing when any intermediate segment is absent. Unsets apply before sets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A serializable mutation of the context document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDiff {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
}

impl ContextDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.insert(path.into(), value);
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// All paths this diff writes or removes
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.set.keys().map(String::as_str).chain(self.unset.iter().map(String::as_str))
    }

    pub fn apply(&self, data: &mut Map<String, Value>) {
        for path in &self.unset {
            unset_path(data, path);
        }
        for (path, value) in &self.set {
            set_path(data, path, value.clone());
        }
    }
}

fn segments(path: &str) -> Option<Vec<&str>> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    Some(path.split('.').collect())
}

pub fn set_path(data: &mut Map<String, Value>, path: &str, value: Value) {
    let Some(parts) = segments(path) else {
        return;
    };
    let (leaf, parents) = match parts.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = data;
    for key in parents {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

pub fn unset_path(data: &mut Map<String, Value>, path: &str) {
    let Some(parts) = segments(path) else {
        return;
    };
    let (leaf, parents) = match parts.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = data;
    for key in parents {
        current = match current.get_mut(*key) {
            Some(Value::Object(map)) => map,
            _ => return,
        };
    }
    current.remove(*leaf);
}

/// Resolve a dotted path; numeric segments index into arrays
///
/// An empty path resolves to `root` itself.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
