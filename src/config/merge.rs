//! Precedence merge for configuration values.
//!
//! Sources are listed highest precedence first. The leftmost value wins on a
//! scalar conflict; objects merge key by key and arrays are concatenated with the
//! higher-precedence items first.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Custom merge function: receives sources highest precedence first.
pub type Merger = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// Merge `high` over `low`.
///
/// - Objects are merged recursively
/// - Arrays are concatenated, `high` items first
/// - A `null` in `high` does not shadow `low` (null means "not specified")
/// - Any other value in `high` replaces `low`
/// - A non-object `low` at the top level is treated as an empty object
///
/// # Example
/// ```
/// use serde_json::json;
/// use confstack::config::merge;
///
/// let user = json!({ "colors": { "primary": "user" }, "tags": ["a"] });
/// let theme = json!({ "colors": { "primary": "theme", "secondary": "x" }, "tags": ["b"] });
/// assert_eq!(
///     merge(user, theme),
///     json!({ "colors": { "primary": "user", "secondary": "x" }, "tags": ["a", "b"] })
/// );
/// ```
pub fn merge(high: Value, low: Value) -> Value {
    let base = match low {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    match high {
        Value::Object(high_map) => Value::Object(merge_maps(high_map, base)),
        _ => Value::Object(base),
    }
}

fn merge_maps(high: Map<String, Value>, mut base: Map<String, Value>) -> Map<String, Value> {
    for (key, high_value) in high {
        if high_value.is_null() {
            continue;
        }
        let merged = match (high_value, base.remove(&key)) {
            (Value::Array(mut items), Some(Value::Array(low_items))) => {
                items.extend(low_items);
                Value::Array(items)
            }
            (Value::Object(high_obj), Some(Value::Object(low_obj))) => {
                Value::Object(merge_maps(high_obj, low_obj))
            }
            (high_value, _) => high_value,
        };
        base.insert(key, merged);
    }
    base
}

/// Merge many sources, highest precedence first.
///
/// Equivalent to folding `merge` from the lowest source upwards. The result is
/// always an object.
pub fn merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    let values: Vec<Value> = values.into_iter().collect();
    values
        .into_iter()
        .rev()
        .fold(Value::Object(Map::new()), |low, high| merge(high, low))
}

/// Merge with a custom merger when one is configured.
pub(crate) fn merge_with(merger: Option<&Merger>, values: Vec<Value>) -> Value {
    match merger {
        Some(merger) => merger(values),
        None => merge_all(values),
    }
}

/// True for `null`, empty objects and empty arrays.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
