//! RC files: flat `key=value` configuration.
//!
//! ```text
//! # comment
//! database.host=localhost
//! database.port=5432
//! tags.0=a
//! tags.1=b
//! plugins[]=x
//! ```
//!
//! Dotted keys are unflattened into nested objects and numeric segments into arrays.
//! Values are decoded as JSON where possible (`true`, `42`, `"quoted"`), otherwise
//! kept as strings.

use crate::error::{ConfigError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decode an RC value.
fn decode_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw == "undefined" {
        return Value::Null;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => {
            // single-quoted strings
            if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
                Value::String(raw[1..raw.len() - 1].to_string())
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

/// Parse RC contents into a nested object.
pub fn parse(contents: &str) -> Value {
    let mut root = Value::Object(Map::new());
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = decode_value(raw);
        if let Some(array_key) = key.strip_suffix("[]") {
            push_path(&mut root, array_key, value);
        } else {
            set_path(&mut root, key, value);
        }
    }
    root
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Array position for `segment`. Only existing slots and the next free one qualify.
fn array_index(segment: &str, len: usize) -> Option<usize> {
    if !is_index(segment) {
        return None;
    }
    segment.parse::<usize>().ok().filter(|idx| *idx <= len)
}

fn child_container(next: Option<&str>) -> Value {
    match next {
        Some(segment) if is_index(segment) => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    }
}

/// Turn an array into an object keyed by position, for sparse or named segments.
fn array_to_object(value: &mut Value) {
    if let Value::Array(items) = std::mem::take(value) {
        *value = Value::Object(
            items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| (idx.to_string(), item))
                .collect(),
        );
    }
}

fn array_slot<'a>(items: &'a mut Vec<Value>, idx: usize, next: Option<&str>) -> &'a mut Value {
    if idx == items.len() {
        items.push(Value::Null);
    }
    let entry = &mut items[idx];
    if next.is_some() && !(entry.is_object() || entry.is_array()) {
        *entry = child_container(next);
    }
    entry
}

fn object_slot<'a>(value: &'a mut Value, segment: &str, next: Option<&str>) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let Value::Object(map) = value else {
        unreachable!("slot container was just made an object")
    };
    let entry = map
        .entry(segment.to_string())
        .or_insert_with(|| if next.is_some() { child_container(next) } else { Value::Null });
    if next.is_some() && !(entry.is_object() || entry.is_array()) {
        *entry = child_container(next);
    }
    entry
}

/// Walk to the slot for `segments`, creating containers on the way.
fn slot<'a>(root: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let next = segments.get(i + 1).copied();
        let idx = match &*current {
            Value::Array(items) => array_index(segment, items.len()),
            _ => None,
        };
        if idx.is_none() && current.is_array() {
            array_to_object(current);
        }
        current = match (current, idx) {
            (Value::Array(items), Some(idx)) => array_slot(items, idx, next),
            (other, _) => object_slot(other, segment, next),
        };
    }
    current
}

fn set_path(root: &mut Value, key: &str, value: Value) {
    let segments: Vec<&str> = key.split('.').collect();
    *slot(root, &segments) = value;
}

fn push_path(root: &mut Value, key: &str, value: Value) {
    let segments: Vec<&str> = key.split('.').collect();
    let target = slot(root, &segments);
    match target {
        Value::Array(items) => items.push(value),
        other => *other = Value::Array(vec![value]),
    }
}

/// Flatten a nested object into `key=value` lines.
pub fn serialize(config: &Value) -> String {
    let mut lines = Vec::new();
    flatten_into("", config, &mut lines);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn flatten_into(prefix: &str, value: &Value, lines: &mut Vec<String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        Value::Object(map) if !map.is_empty() || prefix.is_empty() => {
            for (key, child) in map {
                flatten_into(&join(key), child, lines);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(&join(&idx.to_string()), child, lines);
            }
        }
        Value::Null => {}
        other => lines.push(format!("{prefix}={other}")),
    }
}

/// Read `dir/name`; a missing file is an empty object.
pub async fn read(name: &str, dir: &Path) -> Result<Value> {
    read_file(&dir.join(name)).await
}

/// Read `name` from the user's home directory.
pub async fn read_user(name: &str) -> Result<Value> {
    match dirs::home_dir() {
        Some(home) => read(name, &home).await,
        None => Ok(Value::Object(Map::new())),
    }
}

async fn read_file(path: &Path) -> Result<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            debug!("Read rc file {}", path.display());
            Ok(parse(&contents))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Map::new())),
        Err(e) => Err(ConfigError::io(path, e)),
    }
}

/// Read `dir/name`, let `update` modify it, and write it back.
///
/// Returns the path of the RC file.
pub async fn update_rc<F>(name: &str, dir: &Path, update: F) -> Result<PathBuf>
where
    F: FnOnce(&mut Value),
{
    if name.is_empty() {
        return Err(ConfigError::Rc {
            path: dir.to_path_buf(),
            message: "rc file name is required".to_string(),
        });
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConfigError::io(dir, e))?;
    let path = dir.join(name);
    let mut config = read_file(&path).await?;
    update(&mut config);
    tokio::fs::write(&path, serialize(&config))
        .await
        .map_err(|e| ConfigError::io(&path, e))?;
    Ok(path)
}
