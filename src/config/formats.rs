//! File-format loaders.
//!
//! The extension decides the parser:
//! - `.js .ts .mjs .cjs .mts .cts` go through a [`ModuleLoader`]
//! - `.json` is parsed as JSON
//! - `.jsonc .json5` are parsed as JSON5
//! - `.yaml .yml` are parsed as YAML
//! - `.toml` is parsed as TOML

use super::types::ConfigFunctionContext;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

/// Extensions handled by a [`ModuleLoader`].
pub const MODULE_EXTENSIONS: &[&str] = &[".js", ".ts", ".mjs", ".cjs", ".mts", ".cts"];

/// A config computed by a function export.
pub type ConfigFn = Arc<
    dyn Fn(ConfigFunctionContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// The default export of a config module.
#[derive(Clone)]
pub enum ModuleExport {
    Value(Value),
    /// Invoked with the config-function context, its result is the config.
    Function(ConfigFn),
}

impl std::fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleExport::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ModuleExport::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Loads code-like config files.
///
/// `ctx` carries the environment the module is evaluated in.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn import(&self, path: &Path, ctx: &ConfigFunctionContext) -> Result<ModuleExport>;
}

/// Reads modules whose default export is a literal object.
///
/// Accepts `export default {...}`, `export default defineConfig({...})` and
/// `module.exports = {...}`; the literal is parsed as JSON5. No code is evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralModuleLoader;

#[async_trait]
impl ModuleLoader for LiteralModuleLoader {
    async fn import(&self, path: &Path, _ctx: &ConfigFunctionContext) -> Result<ModuleExport> {
        let source = read(path).await?;
        let literal = extract_default_export(&source).ok_or_else(|| ConfigError::ModuleLoad {
            path: path.to_path_buf(),
            message: "no literal default export found".to_string(),
        })?;
        let value: Value = json5::from_str(literal).map_err(|e| ConfigError::ModuleLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(ModuleExport::Value(value))
    }
}

/// Slice the exported literal out of a module source.
fn extract_default_export(source: &str) -> Option<&str> {
    let start = ["export default", "module.exports ="]
        .iter()
        .find_map(|marker| source.find(marker).map(|i| i + marker.len()))?;
    let mut expr = source[start..].trim().trim_end_matches(';').trim_end();

    // defineConfig({...}) and similar identity wrappers
    if let Some(open) = expr.find('(')
        && expr[..open]
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
        && !expr[..open].is_empty()
        && expr.ends_with(')')
    {
        expr = expr[open + 1..expr.len() - 1].trim();
    }
    (!expr.is_empty()).then_some(expr)
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::io(path, e))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// True if `path` has an extension handled by a module loader.
pub fn is_module_file(path: &Path) -> bool {
    MODULE_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Parse structured-data `content` according to `extension` (with leading dot).
pub fn parse_structured(path: &Path, extension: &str, content: &str) -> Result<Value> {
    if content.trim().is_empty() && extension != ".json" {
        return Ok(Value::Null);
    }
    match extension {
        ".json" => serde_json::from_str(content).map_err(|e| ConfigError::parse(path, e)),
        ".jsonc" | ".json5" => json5::from_str(content).map_err(|e| ConfigError::parse(path, e)),
        ".yaml" | ".yml" => serde_yaml::from_str(content).map_err(|e| ConfigError::parse(path, e)),
        ".toml" => toml::from_str(content).map_err(|e| ConfigError::parse(path, e)),
        other => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: other.to_string(),
        }),
    }
}

/// Load a config file and return its config object.
///
/// Function exports are invoked with `ctx`. An empty document yields `{}`; any
/// other non-object top level is a parse error.
pub async fn load_file(
    path: &Path,
    loader: &dyn ModuleLoader,
    ctx: &ConfigFunctionContext,
) -> Result<Value> {
    let extension = extension_of(path);
    let value = if MODULE_EXTENSIONS.contains(&extension.as_str()) {
        match loader.import(path, ctx).await? {
            ModuleExport::Value(value) => value,
            ModuleExport::Function(f) => f(ctx.clone()).await?,
        }
    } else {
        let content = read(path).await?;
        parse_structured(path, &extension, &content)?
    };

    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        other => Err(ConfigError::parse(
            path,
            format!("expected a config object, found {}", type_name(&other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    async fn load(path: &Path) -> Result<Value> {
        load_file(path, &LiteralModuleLoader, &ConfigFunctionContext::default()).await
    }

    #[test]
    fn test_extract_default_export_forms() {
        assert_eq!(extract_default_export("export default { a: 1 };"), Some("{ a: 1 }"));
        assert_eq!(
            extract_default_export("import { defineConfig } from 'x'\nexport default defineConfig({ a: 1 })\n"),
            Some("{ a: 1 }")
        );
        assert_eq!(extract_default_export("module.exports = { a: 1 }"), Some("{ a: 1 }"));
        assert_eq!(extract_default_export("const a = 1"), None);
    }

    #[tokio::test]
    async fn test_load_each_structured_format() {
        let temp = TempDir::new().unwrap();
        let files = [
            ("c.json", r#"{"a": 1}"#),
            ("c.jsonc", "{\n // comment\n \"a\": 1,\n}"),
            ("c.json5", "{a: 1, /* x */}"),
            ("c.yaml", "a: 1\n"),
            ("c.yml", "a: 1\n"),
            ("c.toml", "a = 1\n"),
        ];
        for (name, content) in files {
            let path = temp.path().join(name);
            fs::write(&path, content).unwrap();
            assert_eq!(load(&path).await.unwrap(), json!({"a": 1}), "{name}");
        }
    }

    #[tokio::test]
    async fn test_load_literal_module() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ts");
        fs::write(
            &path,
            "export default {\n  colors: { primary: 'theme' },\n  $test: { x: true },\n}\n",
        )
        .unwrap();
        assert_eq!(
            load(&path).await.unwrap(),
            json!({"colors": {"primary": "theme"}, "$test": {"x": true}})
        );
    }

    #[tokio::test]
    async fn test_module_without_literal_export_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.js");
        fs::write(&path, "console.log('hi')").unwrap();
        assert!(matches!(load(&path).await, Err(ConfigError::ModuleLoad { .. })));
    }

    struct FunctionLoader;

    #[async_trait]
    impl ModuleLoader for FunctionLoader {
        async fn import(
            &self,
            _path: &Path,
            _ctx: &ConfigFunctionContext,
        ) -> Result<ModuleExport> {
            Ok(ModuleExport::Function(Arc::new(
                |ctx: ConfigFunctionContext| -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> {
                    Box::pin(async move { Ok(json!({ "env": ctx.env_name })) })
                },
            )))
        }
    }

    #[tokio::test]
    async fn test_function_export_receives_context() {
        let ctx = ConfigFunctionContext {
            env_name: Some("production".to_string()),
            ..Default::default()
        };
        let value = load_file(Path::new("/virtual/config.ts"), &FunctionLoader, &ctx)
            .await
            .unwrap();
        assert_eq!(value, json!({"env": "production"}));
    }

    #[tokio::test]
    async fn test_empty_yaml_is_empty_object() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "").unwrap();
        assert_eq!(load(&path).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_array_top_level_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(load(&path).await, Err(ConfigError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_invalid_json_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        let err = load(&path).await.unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }
}
