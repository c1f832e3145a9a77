//! Recursive layer extension.
//!
//! A config names its base layers under the extension keys (default `extends`):
//!
//! ```json
//! { "extends": ["./base", ["gh:org/theme", { "auth": "..." }], { "source": "pkg" }] }
//! ```
//!
//! Each entry is resolved relative to the directory of the layer that declares it,
//! then expanded in turn. The result is depth-first pre-order: a layer is followed
//! directly by its own bases, before its next sibling.

use super::resolver::resolve_layer;
use super::types::{ResolveOptions, ResolvedLayer, SourceOptions};
use crate::error::{ConfigError, Result};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, warn};

/// One reference from an extension list, in canonical form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionEntry {
    pub source: String,
    pub options: SourceOptions,
}

impl ExtensionEntry {
    /// Parse one of `"source"`, `{ "source": ..., "options": {...} }` or
    /// `["source", {...}]`. Returns `None` for any other shape.
    pub fn parse(raw: &Value) -> Option<Self> {
        let (source, options) = match raw {
            Value::String(source) => (source.as_str(), None),
            Value::Object(map) => (map.get("source")?.as_str()?, map.get("options")),
            Value::Array(items) => (items.first()?.as_str()?, items.get(1)),
            _ => return None,
        };
        if source.is_empty() {
            return None;
        }
        let options = match options {
            None | Some(Value::Null) => SourceOptions::default(),
            Some(value) => serde_json::from_value(value.clone()).ok()?,
        };
        Some(Self {
            source: source.to_string(),
            options,
        })
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Remove the extension keys from `config` and return their entries in key order.
fn take_entries(config: &mut Value, keys: &[String]) -> Vec<Value> {
    let Some(map) = config.as_object_mut() else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for key in keys {
        match map.remove(key) {
            Some(Value::Array(items)) => entries.extend(items.into_iter().filter(|v| !is_falsy(v))),
            Some(value) if !is_falsy(&value) => entries.push(value),
            _ => {}
        }
    }
    entries
}

/// `config` without its top-level extension keys.
pub fn strip_extend_keys(mut config: Value, keys: &[String]) -> Value {
    if let Some(map) = config.as_object_mut() {
        for key in keys {
            map.remove(key);
        }
    }
    config
}

/// Expand the extension keys of `config`.
///
/// Returns the config with its extension keys removed and the discovered layers,
/// each with its own extension keys removed. `origin` is the file `config` was
/// loaded from, if any; extending back into it is reported as a cycle.
pub async fn expand_extensions(
    config: Value,
    options: &ResolveOptions,
    origin: Option<&Path>,
) -> Result<(Value, Vec<ResolvedLayer>)> {
    let mut stack: Vec<PathBuf> = origin.map(Path::to_path_buf).into_iter().collect();
    walk(config, options, &mut stack).await
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(Value, Vec<ResolvedLayer>)>> + Send + 'a>>;

fn walk<'a>(config: Value, options: &'a ResolveOptions, stack: &'a mut Vec<PathBuf>) -> WalkFuture<'a> {
    Box::pin(async move {
        let mut config = config;
        let entries = take_entries(&mut config, &options.extend.keys);
        let mut layers = Vec::new();

        for raw in entries {
            let Some(entry) = ExtensionEntry::parse(&raw) else {
                if options.extend.strict {
                    return Err(ConfigError::InvalidExtendsEntry {
                        entry: raw.to_string(),
                        cwd: options.cwd.clone(),
                    });
                }
                warn!(
                    "Cannot extend config from `{}` in {}",
                    raw,
                    options.cwd.display()
                );
                continue;
            };

            let mut layer = resolve_layer(&entry.source, options, entry.options).await?;
            let Some(layer_config) = layer.config.take() else {
                if options.extend.strict {
                    return Err(ConfigError::ExtendsNotFound {
                        source_ref: entry.source,
                        cwd: options.cwd.clone(),
                    });
                }
                warn!(
                    "Cannot extend config from `{}` in {}",
                    entry.source,
                    options.cwd.display()
                );
                continue;
            };

            if let Some(file) = &layer.config_file
                && stack.contains(file)
            {
                let mut chain = stack.clone();
                chain.push(file.clone());
                return Err(ConfigError::ExtendsCycle { chain });
            }

            let child_options = match &layer.cwd {
                Some(cwd) => options.with_cwd(cwd.clone()),
                None => options.clone(),
            };
            if let Some(file) = &layer.config_file {
                stack.push(file.clone());
            }
            let (child_config, sub_layers) = walk(layer_config, &child_options, stack).await?;
            if layer.config_file.is_some() {
                stack.pop();
            }

            debug!(
                "Extended with `{}` ({} nested layers)",
                entry.source,
                sub_layers.len()
            );
            layer.config = Some(child_config);
            layers.push(layer);
            layers.extend(sub_layers);
        }

        Ok((config, layers))
    })
}
