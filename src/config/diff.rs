//! Structural diff of two config values.
//!
//! Objects are compared key by key; arrays and scalars are compared as a whole.
//! Paths are dotted (`server.port`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// A single changed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// All changes between two configs, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDiff {
    pub entries: Vec<DiffEntry>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter()
    }

    /// Entry for an exact path.
    pub fn get(&self, path: &str) -> Option<&DiffEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No differences found.");
        }
        for entry in &self.entries {
            match entry.kind {
                ChangeKind::Added => writeln!(f, "  + {}: {}", entry.path, brief(&entry.new_value))?,
                ChangeKind::Removed => writeln!(f, "  - {}: {}", entry.path, brief(&entry.old_value))?,
                ChangeKind::Changed => writeln!(
                    f,
                    "  ~ {}: {} -> {}",
                    entry.path,
                    brief(&entry.old_value),
                    brief(&entry.new_value)
                )?,
            }
        }
        Ok(())
    }
}

fn brief(value: &Option<Value>) -> String {
    let s = value.as_ref().map(Value::to_string).unwrap_or_default();
    if s.len() > 60 {
        let cut = s.char_indices().nth(57).map(|(i, _)| i).unwrap_or(s.len());
        format!("{}...", &s[..cut])
    } else {
        s
    }
}

/// Compute the changes from `old` to `new`.
pub fn diff(old: &Value, new: &Value) -> ConfigDiff {
    let mut entries = Vec::new();
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_maps("", old, new, &mut entries),
        _ if old != new => entries.push(DiffEntry {
            path: String::new(),
            kind: ChangeKind::Changed,
            old_value: Some(old.clone()),
            new_value: Some(new.clone()),
        }),
        _ => {}
    }
    ConfigDiff { entries }
}

fn diff_maps(prefix: &str, old: &Map<String, Value>, new: &Map<String, Value>, out: &mut Vec<DiffEntry>) {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match (old.get(key), new.get(key)) {
            (Some(Value::Object(a)), Some(Value::Object(b))) => diff_maps(&path, a, b, out),
            (Some(a), Some(b)) if a != b => out.push(DiffEntry {
                path,
                kind: ChangeKind::Changed,
                old_value: Some(a.clone()),
                new_value: Some(b.clone()),
            }),
            (Some(a), None) => out.push(DiffEntry {
                path,
                kind: ChangeKind::Removed,
                old_value: Some(a.clone()),
                new_value: None,
            }),
            (None, Some(b)) => out.push(DiffEntry {
                path,
                kind: ChangeKind::Added,
                old_value: None,
                new_value: Some(b.clone()),
            }),
            _ => {}
        }
    }
}
