//! Layered configuration loading.
//!
//! Sources, highest precedence first:
//!
//! | Source | Notes |
//! |---|---|
//! | `overrides` | value or provider |
//! | main config file | located in `cwd` |
//! | RC files | local, then workspace root and home with `global_rc` |
//! | `package.json` fields | nearest manifest |
//! | `default_config` | value or provider, may itself extend |
//! | extended layers | depth-first, in declaration order |
//! | `defaults` | applied last, never extended |

use super::dotenv::{Environment, setup_dotenv};
use super::extends::expand_extensions;
use super::locate::{join_clean, normalize_path};
use super::manifest::{find_workspace_dir, read_package_json};
use super::merge::{Merger, merge_with};
use super::rc;
use super::resolver::resolve_layer;
use super::types::{
    ConfigSources, EnvName, LayerKind, LoadConfigOptions, PackageJsonFields, ResolvableConfigContext,
    ResolveOptions, ResolvedConfig, ResolvedLayer, SourceOptions,
};
use super::validate::run_validator;
use crate::error::{ConfigError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable consulted for the overlay name.
pub const ENV_NAME_VAR: &str = "NODE_ENV";

/// Load and merge every configured source.
pub async fn load_config(options: LoadConfigOptions) -> Result<ResolvedConfig> {
    let cwd = absolute_cwd(options.cwd.as_deref())?;
    let config_file_name = options.config_file_name();
    let merger = options.merger.as_ref();

    let mut environment = options
        .environment
        .clone()
        .unwrap_or_else(Environment::from_process);
    if let Some(dotenv) = &options.dotenv {
        let dir = match &dotenv.cwd {
            Some(dir) => join_clean(&cwd, &dir.to_string_lossy()),
            None => cwd.clone(),
        };
        let loaded = setup_dotenv(&dir, dotenv, &mut environment)?;
        debug!("Loaded {} dotenv entries from {}", loaded.len(), dir.display());
    }

    let env_name = match &options.env_name {
        EnvName::FromEnvironment => environment.get(ENV_NAME_VAR).map(str::to_string),
        EnvName::Disabled => None,
        EnvName::Named(name) => Some(name.clone()),
    };

    let resolve_options = ResolveOptions {
        cwd: cwd.clone(),
        name: options.name.clone(),
        config_file: config_file_name.clone(),
        env_name,
        environment: Arc::new(environment),
        context: options.context.clone(),
        resolver: options.resolver.clone(),
        module_loader: options.module_loader.clone(),
        remote: options.remote.clone(),
        merger: options.merger.clone(),
        extend: options.extend.clone().unwrap_or_default(),
    };

    // Main config file
    let mut main = resolve_layer(".", &resolve_options, SourceOptions::default()).await?;
    main.kind = LayerKind::Main;
    if main.config.is_none() && options.config_file_required {
        return Err(ConfigError::MissingConfigFile {
            name: config_file_name,
            cwd,
        });
    }
    let config_file = main
        .config_file
        .clone()
        .unwrap_or_else(|| normalize_path(&cwd.join(&config_file_name)));

    // RC files
    let rc_layer = match options.rc_file_name() {
        Some(rc_name) => Some(load_rc(&rc_name, &cwd, options.global_rc, merger).await?),
        None => None,
    };

    // package.json
    let package_layer = load_package_json(&options, &cwd, merger).await;

    // Resolvable sources see the ones already resolved.
    let mut sources = ConfigSources {
        main: main.config.clone(),
        rc: rc_layer.as_ref().and_then(|l| l.config.clone()),
        package_json: package_layer.as_ref().and_then(|l| l.config.clone()),
        ..Default::default()
    };
    if let Some(overrides) = &options.overrides {
        let ctx = ResolvableConfigContext {
            configs: sources.clone(),
        };
        sources.overrides = overrides.resolve(&ctx).await?;
    }
    if let Some(default_config) = &options.default_config {
        let ctx = ResolvableConfigContext {
            configs: sources.clone(),
        };
        sources.default_config = default_config.resolve(&ctx).await?;
    }

    let combined = merge_with(
        merger,
        [
            sources.overrides.clone(),
            sources.main.clone(),
            sources.rc.clone(),
            sources.package_json.clone(),
            sources.default_config.clone(),
        ]
        .into_iter()
        .flatten()
        .collect(),
    );

    let (mut config, extended) = if options.extend.is_some() {
        let (stripped, extended) =
            expand_extensions(combined, &resolve_options, main.config_file.as_deref()).await?;
        let mut values = vec![stripped];
        values.extend(extended.iter().filter_map(|l| l.config.clone()));
        (merge_with(merger, values), extended)
    } else {
        (combined, Vec::new())
    };

    let mut layers: Vec<ResolvedLayer> = Vec::new();
    if let Some(overrides) = sources.overrides {
        layers.push(ResolvedLayer::base(LayerKind::Overrides, overrides));
    }
    layers.push(main);
    layers.extend(rc_layer);
    layers.extend(package_layer);
    if let Some(default_config) = sources.default_config {
        let mut layer = ResolvedLayer::base(LayerKind::DefaultConfig, default_config);
        layer.cwd = Some(normalize_path(&cwd));
        layers.push(layer);
    }
    layers.extend(extended);

    if let Some(defaults) = &options.defaults {
        config = merge_with(merger, vec![config, defaults.clone()]);
        layers.push(ResolvedLayer::base(LayerKind::Defaults, defaults.clone()));
    }
    layers.retain(ResolvedLayer::has_config);

    if options.omit_dollar_keys
        && let Some(map) = config.as_object_mut()
    {
        map.retain(|key, _| !key.starts_with('$'));
    }

    let resolved = ResolvedConfig {
        config,
        cwd: normalize_path(&cwd),
        config_file,
        layers,
    };

    if let Some(validator) = &options.validator {
        run_validator(validator.as_ref(), &resolved)?;
    }

    info!(
        "Loaded `{}` config from {} ({} layers)",
        options.name,
        resolved.cwd.display(),
        resolved.layers.len()
    );
    Ok(resolved)
}

fn absolute_cwd(cwd: Option<&Path>) -> Result<PathBuf> {
    let current = std::env::current_dir().map_err(|e| ConfigError::io(".", e));
    match cwd {
        Some(cwd) if cwd.is_absolute() => Ok(join_clean(cwd, ".")),
        Some(cwd) => Ok(join_clean(&current?, &cwd.to_string_lossy())),
        None => current,
    }
}

/// Merge the RC file in `cwd` over the workspace and home ones.
async fn load_rc(
    rc_name: &str,
    cwd: &Path,
    global: bool,
    merger: Option<&Merger>,
) -> Result<ResolvedLayer> {
    let mut sources = vec![rc::read(rc_name, cwd).await?];
    if global {
        if let Some(workspace) = find_workspace_dir(cwd).await {
            sources.push(rc::read(rc_name, &workspace).await?);
        }
        sources.push(rc::read_user(rc_name).await?);
    }
    let mut layer = ResolvedLayer::base(LayerKind::Rc, merge_with(merger, sources));
    layer.config_file = Some(normalize_path(&cwd.join(rc_name)));
    layer.cwd = Some(normalize_path(cwd));
    Ok(layer)
}

async fn load_package_json(
    options: &LoadConfigOptions,
    cwd: &Path,
    merger: Option<&Merger>,
) -> Option<ResolvedLayer> {
    let keys = match &options.package_json {
        PackageJsonFields::Disabled => return None,
        PackageJsonFields::Name => vec![options.name.clone()],
        PackageJsonFields::Fields(fields) => fields.clone(),
    };
    let (path, manifest) = match read_package_json(cwd).await {
        Ok(Some(found)) => found,
        Ok(None) => return None,
        Err(e) => {
            warn!("Ignoring unreadable package.json: {}", e);
            return None;
        }
    };
    let values: Vec<Value> = keys
        .iter()
        .filter(|k| !k.is_empty())
        .filter_map(|k| manifest.get(k).cloned())
        .collect();
    let mut layer = ResolvedLayer::base(LayerKind::PackageJson, merge_with(merger, values));
    layer.cwd = path.parent().map(normalize_path);
    layer.config_file = Some(normalize_path(&path));
    Some(layer)
}
