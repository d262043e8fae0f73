//! Field bag
//!
//! Wraps a raw JSON document and hands fields out destructively: every
//! `take` clears the field in place, so whatever is still set once
//! normalization finishes is, by definition, data nobody handled. The
//! orchestrator reports those leftovers via [`FieldBag::remaining_leaves`].

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A mutable view over a raw nested JSON document with dotted-path access
#[derive(Debug, Clone)]
pub struct FieldBag {
    root: Value,
}

impl FieldBag {
    /// Wraps a raw document
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Reads the value at `path` and nulls it in place.
    ///
    /// A second take on the same path returns `Null`, as does a path that
    /// never existed or whose intermediate segments are not objects.
    pub fn take(&mut self, path: &str) -> Value {
        let mut current = &mut self.root;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let Some(map) = current.as_object_mut() else {
                return Value::Null;
            };
            if segments.peek().is_none() {
                return match map.get_mut(segment) {
                    Some(slot) => std::mem::replace(slot, Value::Null),
                    None => Value::Null,
                };
            }
            match map.get_mut(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        Value::Null
    }

    /// Non-consuming peek at `path`; `None` when absent or null
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        non_null_ref(current)
    }

    /// Non-consuming string peek at `path`
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Sets `path` to `value`, creating intermediate objects as needed
    pub fn set(&mut self, path: &str, value: Value) {
        let mut current = &mut self.root;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let map = current.as_object_mut().expect("just made an object");
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    /// Takes a string field; non-string scalars are JSON-encoded
    pub fn take_str(&mut self, path: &str) -> Option<String> {
        match self.take(path) {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    /// Takes an integer field, accepting both numeric and string encodings
    pub fn take_i64(&mut self, path: &str) -> Option<i64> {
        match self.take(path) {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Takes a non-negative integer field
    pub fn take_u32(&mut self, path: &str) -> Option<u32> {
        self.take_i64(path).and_then(|n| u32::try_from(n).ok())
    }

    /// Takes an RFC 3339 timestamp field
    pub fn take_date(&mut self, path: &str) -> Option<DateTime<Utc>> {
        let raw = self.take_str(path)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Takes a field as a list of strings, wrapping a bare string into a
    /// single-element list
    pub fn take_string_list(&mut self, path: &str) -> Vec<String> {
        match self.take(path) {
            Value::String(s) => vec![s],
            Value::Array(values) => values
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Dotted paths of all leaves that are still non-null
    pub fn remaining_leaves(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_leaf_paths(&self.root, None, &mut paths);
        paths.sort();
        paths
    }

    /// Fills missing or null fields from `defaults` without overwriting
    /// anything already set (`set_default` semantics)
    pub fn merge_missing(&mut self, defaults: Value) {
        merge_missing_value(&mut self.root, defaults);
    }

    /// The underlying document
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Consumes the bag, returning whatever is left of the document
    pub fn into_value(self) -> Value {
        self.root
    }
}

/// `Some(value)` unless the value is JSON null
pub fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

fn non_null_ref(value: &Value) -> Option<&Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

/// Leaves of a nested document as `(dotted path, value)` pairs.
///
/// Arrays and scalars are leaves; null leaves are skipped.
pub fn leaves(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    collect_leaves(value, None, &mut out);
    out
}

fn collect_leaves(value: &Value, prefix: Option<&str>, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                let path = match prefix {
                    Some(p) => format!("{p}.{key}"),
                    None => key.clone(),
                };
                collect_leaves(child, Some(&path), out);
            }
        }
        other => {
            if let Some(p) = prefix {
                out.push((p.to_string(), other.clone()));
            }
        }
    }
}

fn collect_leaf_paths(value: &Value, prefix: Option<&str>, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                let path = match prefix {
                    Some(p) => format!("{p}.{key}"),
                    None => key.clone(),
                };
                collect_leaf_paths(child, Some(&path), out);
            }
        }
        _ => {
            if let Some(p) = prefix {
                out.push(p.to_string());
            }
        }
    }
}

/// Recursively fills missing or null fields of `dest` from `src`.
///
/// Existing non-null values always win; arrays are treated as scalars.
pub fn merge_missing_value(dest: &mut Value, src: Value) {
    match src {
        Value::Null => {}
        Value::Object(src_map) => {
            if dest.is_null() {
                *dest = Value::Object(Map::new());
            }
            let Some(dest_map) = dest.as_object_mut() else {
                return;
            };
            for (key, src_child) in src_map {
                match dest_map.get_mut(&key) {
                    Some(dest_child) => merge_missing_value(dest_child, src_child),
                    None => {
                        dest_map.insert(key, src_child);
                    }
                }
            }
        }
        other => {
            if dest.is_null() {
                *dest = other;
            }
        }
    }
}
