//! Resolution of a single layer reference.

use super::env_overlay::apply_env;
use super::formats::load_file;
use super::locate::{
    is_dir, is_directory_reference, is_package_specifier, join_clean, locate, normalize_path,
    normalize_separators, resolve_package,
};
use super::merge::{merge, merge_with};
use super::remote::resolve_remote;
use super::types::{ConfigFunctionContext, LayerKind, ResolveOptions, ResolvedLayer, SourceOptions};
use crate::error::Result;
use serde_json::{Map, Value};
use tracing::debug;

/// Resolve `source` relative to `options.cwd` into a layer.
///
/// A custom resolver runs first and may claim the source outright. Remote sources
/// are fetched and replaced by their cache directory, bare package names are looked
/// up in `node_modules`. Directory references are searched for the logical config
/// file; file references are loaded directly.
///
/// Nothing found is not an error: the returned layer has `config: None`.
pub async fn resolve_layer(
    source: &str,
    options: &ResolveOptions,
    source_options: SourceOptions,
) -> Result<ResolvedLayer> {
    if let Some(resolver) = &options.resolver
        && let Some(layer) = resolver.resolve(source, &options.cwd).await?
    {
        debug!("Custom resolver handled `{}`", source);
        return Ok(layer);
    }

    let mut target_ref = source.to_string();

    if options.remote.is_remote(&target_ref) {
        let dir = resolve_remote(&target_ref, options, &source_options).await?;
        target_ref = dir.to_string_lossy().into_owned();
    }

    if is_package_specifier(&target_ref)
        && let Some(resolved) = resolve_package(&target_ref, &options.cwd).await
    {
        debug!("Resolved package `{}` to {}", target_ref, resolved.display());
        target_ref = resolved.to_string_lossy().into_owned();
    }

    let target = join_clean(&options.cwd, &target_ref);
    let (cwd, logical_name) = if is_directory_reference(&target_ref) || is_dir(&target).await {
        (target, options.config_file.clone())
    } else {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cwd = target
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| options.cwd.clone());
        (cwd, name)
    };

    let mut layer = ResolvedLayer {
        kind: LayerKind::Extended,
        config: None,
        config_file: None,
        cwd: Some(normalize_path(&cwd)),
        source: Some(normalize_separators(source)),
        source_options,
        meta: Map::new(),
    };

    let Some(config_file) = locate(&cwd, &logical_name).await else {
        debug!("No `{}` config found in {}", logical_name, cwd.display());
        return Ok(layer);
    };

    let ctx = ConfigFunctionContext {
        env_name: options
            .context
            .env_name
            .clone()
            .or_else(|| options.env_name.clone()),
        data: options.context.data.clone(),
        environment: options.environment.clone(),
    };
    let config = load_file(&config_file, options.module_loader.as_ref(), &ctx).await?;

    // Overlay first so `$meta` and layer overrides see the environment-specific values.
    let mut config = apply_env(config, options.env_name.as_deref(), options.merger.as_ref());

    let file_meta = config
        .as_object_mut()
        .and_then(|map| map.remove("$meta"))
        .unwrap_or(Value::Null);
    let explicit_meta = layer
        .source_options
        .meta
        .clone()
        .map(Value::Object)
        .unwrap_or(Value::Null);
    if let Value::Object(meta) = merge(explicit_meta, file_meta) {
        layer.meta = meta;
    }

    if let Some(overrides) = &layer.source_options.overrides {
        config = merge_with(options.merger.as_ref(), vec![overrides.clone(), config]);
    }

    debug!("Loaded layer `{}` from {}", source, config_file.display());
    layer.config = Some(config);
    layer.config_file = Some(normalize_path(&config_file));
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::LayerResolver;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn options(cwd: &Path) -> ResolveOptions {
        ResolveOptions::new(cwd, "config")
    }

    #[tokio::test]
    async fn test_directory_reference_locates_config() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("theme")).unwrap();
        fs::write(
            temp.path().join("theme/config.ts"),
            "export default { colors: { primary: 'theme' } }",
        )
        .unwrap();

        let layer = resolve_layer("./theme", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"colors": {"primary": "theme"}})));
        assert_eq!(layer.cwd.as_deref(), Some(temp.path().join("theme").as_path()));
        assert_eq!(
            layer.config_file.as_deref(),
            Some(temp.path().join("theme/config.ts").as_path())
        );
        assert_eq!(layer.source.as_deref(), Some("./theme"));
    }

    #[tokio::test]
    async fn test_file_reference_uses_parent_as_cwd() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("base")).unwrap();
        fs::write(temp.path().join("base/shared.yaml"), "a: 1\n").unwrap();

        let layer = resolve_layer("./base/shared.yaml", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"a": 1})));
        assert_eq!(layer.cwd.as_deref(), Some(temp.path().join("base").as_path()));
    }

    #[tokio::test]
    async fn test_file_reference_without_extension() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.dev.json"), r#"{"dev": true}"#).unwrap();

        let layer = resolve_layer("./config.dev", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"dev": true})));
    }

    #[tokio::test]
    async fn test_missing_is_absent_not_error() {
        let temp = TempDir::new().unwrap();
        let layer = resolve_layer("./nowhere", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert!(layer.config.is_none());
        assert!(layer.config_file.is_none());
    }

    #[tokio::test]
    async fn test_env_then_meta_then_overrides() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("config.json"),
            r#"{
                "port": 80,
                "$meta": {"name": "file", "version": 1},
                "$production": {"port": 443}
            }"#,
        )
        .unwrap();

        let opts = options(temp.path()).with_env_name(Some("production".into()));
        let source_options: SourceOptions = serde_json::from_value(json!({
            "meta": {"name": "explicit"},
            "overrides": {"host": "example.com"}
        }))
        .unwrap();
        let layer = resolve_layer(".", &opts, source_options).await.unwrap();
        let config = layer.config.unwrap();

        assert_eq!(config["port"], 443);
        assert_eq!(config["host"], "example.com");
        assert!(config.get("$meta").is_none());
        assert!(config.get("$production").is_some());
        assert_eq!(layer.meta["name"], "explicit");
        assert_eq!(layer.meta["version"], 1);
    }

    struct VirtualResolver;

    #[async_trait]
    impl LayerResolver for VirtualResolver {
        async fn resolve(&self, source: &str, _cwd: &Path) -> Result<Option<ResolvedLayer>> {
            Ok((source == "virtual").then(|| ResolvedLayer::virtual_layer(json!({"virtual": true}))))
        }
    }

    #[tokio::test]
    async fn test_custom_resolver_short_circuits() {
        let temp = TempDir::new().unwrap();
        let mut opts = options(temp.path());
        opts.resolver = Some(Arc::new(VirtualResolver));

        let layer = resolve_layer("virtual", &opts, SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"virtual": true})));
        assert!(layer.config_file.is_none());

        let fallthrough = resolve_layer("./other", &opts, SourceOptions::default())
            .await
            .unwrap();
        assert!(fallthrough.config.is_none());
    }

    #[tokio::test]
    async fn test_package_specifier_resolves_in_node_modules() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("node_modules/c12-npm-test");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("config.json"), r#"{"npm": true}"#).unwrap();

        let layer = resolve_layer("c12-npm-test", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"npm": true})));
        assert_eq!(layer.cwd.as_deref(), Some(pkg.as_path()));
        assert_eq!(layer.source.as_deref(), Some("c12-npm-test"));
    }

    #[tokio::test]
    async fn test_unresolved_package_falls_back_to_literal() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("shared")).unwrap();
        fs::write(temp.path().join("shared/config.toml"), "x = 1").unwrap();

        // `shared` is a valid package name but not installed: treated as a path.
        let layer = resolve_layer("shared", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_dotfile_directory_reference() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".base")).unwrap();
        fs::write(temp.path().join(".base/config.json"), r#"{"base": true}"#).unwrap();

        let layer = resolve_layer(".base", &options(temp.path()), SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(layer.config, Some(json!({"base": true})));
    }
}
