//! Environment-specific overlays.
//!
//! A layer may carry `$<env>` and `$env.<env>` sections. When an environment name is
//! selected, both are combined (`$env.<env>` wins) and merged over the layer.

use super::merge::{Merger, merge_with};
use serde_json::{Map, Value};

/// Build the overlay for `env_name`: `$<env>` shallow-merged with `$env.<env>`.
pub fn env_overlay(config: &Value, env_name: &str) -> Map<String, Value> {
    let mut overlay = Map::new();
    if let Some(Value::Object(section)) = config.get(format!("${env_name}")) {
        overlay.extend(section.clone());
    }
    if let Some(Value::Object(section)) = config.get("$env").and_then(|e| e.get(env_name)) {
        overlay.extend(section.clone());
    }
    overlay
}

/// Apply the overlay for `env_name` over `config`.
///
/// `None` disables the step. The `$`-sections themselves are left in place.
pub fn apply_env(config: Value, env_name: Option<&str>, merger: Option<&Merger>) -> Value {
    let Some(env_name) = env_name else {
        return config;
    };
    let overlay = env_overlay(&config, env_name);
    if overlay.is_empty() {
        return config;
    }
    merge_with(merger, vec![Value::Object(overlay), config])
}
