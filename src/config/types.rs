//! Configuration types and structures.
//!
//! Layers, resolved results and the options accepted by [`load_config`](super::load_config).

use super::dotenv::{DotenvOptions, Environment};
use super::extends::strip_extend_keys;
use super::fetch::FetchOptions;
use super::formats::{LiteralModuleLoader, ModuleLoader};
use super::merge::{Merger, merge_all};
use super::remote::RemoteOptions;
use super::validate::ConfigValidator;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arbitrary layer metadata, e.g. a declared `name` and `version`.
pub type LayerMeta = Map<String, Value>;

/// Where a layer in [`ResolvedConfig::layers`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerKind {
    /// Programmatic overrides
    Overrides,
    /// The main config file in the working directory
    Main,
    /// Merged RC files
    Rc,
    /// Fields read from `package.json`
    PackageJson,
    /// The `default_config` source (applied before extension)
    DefaultConfig,
    /// A layer reached through an extension key
    #[default]
    Extended,
    /// Static `defaults` (applied after extension)
    Defaults,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Overrides => write!(f, "overrides"),
            LayerKind::Main => write!(f, "main"),
            LayerKind::Rc => write!(f, "rc"),
            LayerKind::PackageJson => write!(f, "packageJson"),
            LayerKind::DefaultConfig => write!(f, "defaultConfig"),
            LayerKind::Extended => write!(f, "extended"),
            LayerKind::Defaults => write!(f, "defaults"),
        }
    }
}

/// Per-reference options attached to an extension entry.
///
/// Deserialized from the second element of `[source, options]` or the `options`
/// field of `{ source, options }`. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceOptions {
    /// Custom meta for the layer; wins over an in-file `$meta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<LayerMeta>,

    /// Layer-local overrides, merged over the loaded config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,

    /// Options for fetching remote sources.
    #[serde(default, rename = "giget", skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchOptions>,

    /// Reuse an existing cache directory instead of re-fetching into a clean one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub install: bool,

    /// Token for private remote sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One resolved configuration source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLayer {
    pub kind: LayerKind,
    /// Parsed config of this layer; `None` when nothing was found.
    pub config: Option<Value>,
    /// Concrete file that was loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Directory that relative references inside this layer resolve against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// The reference this layer was resolved from, normalized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "SourceOptions::is_empty")]
    pub source_options: SourceOptions,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: LayerMeta,
}

impl ResolvedLayer {
    /// A layer with no file backing, e.g. one produced by a custom resolver.
    pub fn virtual_layer(config: Value) -> Self {
        Self {
            config: Some(config),
            ..Default::default()
        }
    }

    pub(crate) fn base(kind: LayerKind, config: Value) -> Self {
        Self {
            kind,
            config: Some(config),
            ..Default::default()
        }
    }

    /// True when this layer contributes anything to the merge.
    pub fn has_config(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| !super::merge::is_empty_value(c))
    }
}

/// The final result of [`load_config`](super::load_config).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// The fully merged configuration.
    pub config: Value,
    /// Working directory of the main layer.
    pub cwd: PathBuf,
    /// Main config file; the expected location when none was found.
    pub config_file: PathBuf,
    /// Unmerged layers, highest precedence first.
    pub layers: Vec<ResolvedLayer>,
}

impl ResolvedConfig {
    /// Re-merge `layers` with the default precedence.
    ///
    /// Extension keys are dropped from each layer first, since they were consumed
    /// while walking. With `$`-key omission disabled this reproduces `config`.
    pub fn merge_layers(&self, extend_keys: &[String]) -> Value {
        merge_all(self.layers.iter().filter_map(|layer| {
            layer
                .config
                .clone()
                .map(|config| strip_extend_keys(config, extend_keys))
        }))
    }

    /// First layer of the given kind.
    pub fn layer(&self, kind: LayerKind) -> Option<&ResolvedLayer> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    /// Every concrete file that contributed a layer.
    pub fn config_files(&self) -> Vec<&Path> {
        self.layers
            .iter()
            .filter_map(|l| l.config_file.as_deref())
            .collect()
    }
}

/// Already-resolved sibling sources, in resolution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSources {
    pub overrides: Option<Value>,
    pub main: Option<Value>,
    pub rc: Option<Value>,
    pub package_json: Option<Value>,
    pub default_config: Option<Value>,
}

/// Passed to [`ConfigProvider`]s.
#[derive(Debug, Clone, Default)]
pub struct ResolvableConfigContext {
    pub configs: ConfigSources,
}

/// Computes `overrides` or `default_config` from the sources resolved so far.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn provide(&self, ctx: &ResolvableConfigContext) -> Result<Option<Value>>;
}

struct FnProvider<F>(F);

#[async_trait]
impl<F> ConfigProvider for FnProvider<F>
where
    F: Fn(&ResolvableConfigContext) -> Option<Value> + Send + Sync,
{
    async fn provide(&self, ctx: &ResolvableConfigContext) -> Result<Option<Value>> {
        Ok((self.0)(ctx))
    }
}

/// A literal value or a provider evaluated during loading.
#[derive(Clone)]
pub enum ResolvableConfig {
    Value(Value),
    Provider(Arc<dyn ConfigProvider>),
}

impl ResolvableConfig {
    /// Wrap a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ResolvableConfigContext) -> Option<Value> + Send + Sync + 'static,
    {
        Self::Provider(Arc::new(FnProvider(f)))
    }

    pub(crate) async fn resolve(&self, ctx: &ResolvableConfigContext) -> Result<Option<Value>> {
        match self {
            ResolvableConfig::Value(value) => Ok(Some(value.clone())),
            ResolvableConfig::Provider(provider) => provider.provide(ctx).await,
        }
    }
}

impl From<Value> for ResolvableConfig {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for ResolvableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvableConfig::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ResolvableConfig::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Custom resolution hook, consulted before default resolution of every source.
///
/// Returning `Some` fully replaces the default behavior for that source.
#[async_trait]
pub trait LayerResolver: Send + Sync {
    async fn resolve(&self, source: &str, cwd: &Path) -> Result<Option<ResolvedLayer>>;
}

/// Context handed to config modules that export a function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFunctionContext {
    /// Selected environment name, if any.
    pub env_name: Option<String>,
    /// Caller supplied values.
    pub data: Map<String, Value>,
    /// Variables visible to the config, including ones loaded from dotenv files.
    pub environment: Arc<Environment>,
}

/// Which `package.json` fields to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PackageJsonFields {
    #[default]
    Disabled,
    /// The field named after the logical config name.
    Name,
    /// Explicit field names, merged in listed order.
    Fields(Vec<String>),
}

/// How the environment name for overlays is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvName {
    /// Read `NODE_ENV` from the environment.
    #[default]
    FromEnvironment,
    /// Never apply overlays.
    Disabled,
    Named(String),
}

/// Extension walking options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendOptions {
    /// Fields that trigger recursive extension, checked in order.
    pub keys: Vec<String>,
    /// Fail on malformed or unresolvable entries instead of warning.
    pub strict: bool,
}

impl Default for ExtendOptions {
    fn default() -> Self {
        Self {
            keys: vec!["extends".to_string()],
            strict: false,
        }
    }
}

impl ExtendOptions {
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Input to [`load_config`](super::load_config).
#[derive(Clone)]
pub struct LoadConfigOptions {
    /// Working directory; defaults to the process working directory.
    pub cwd: Option<PathBuf>,
    /// Logical name, default `config`.
    pub name: String,
    /// Main file stem; defaults to `config` or `<name>.config`.
    pub config_file: Option<String>,
    /// Read RC files.
    pub rc: bool,
    /// RC file name; defaults to `.<name>rc`.
    pub rc_file: Option<String>,
    /// Also read RC files from the workspace root and the home directory.
    pub global_rc: bool,
    pub dotenv: Option<DotenvOptions>,
    /// Environment variables visible to loading; defaults to the process env.
    pub environment: Option<Environment>,
    pub env_name: EnvName,
    pub package_json: PackageJsonFields,
    /// Applied after extension, lowest precedence.
    pub defaults: Option<Value>,
    /// Applied before extension, may itself extend.
    pub default_config: Option<ResolvableConfig>,
    pub overrides: Option<ResolvableConfig>,
    /// Drop top-level `$` keys from the merged config.
    pub omit_dollar_keys: bool,
    pub context: ConfigFunctionContext,
    pub resolver: Option<Arc<dyn LayerResolver>>,
    pub module_loader: Arc<dyn ModuleLoader>,
    pub remote: RemoteOptions,
    pub merger: Option<Merger>,
    /// `None` disables extension entirely.
    pub extend: Option<ExtendOptions>,
    pub config_file_required: bool,
    pub validator: Option<Arc<dyn ConfigValidator>>,
}

impl Default for LoadConfigOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            name: "config".to_string(),
            config_file: None,
            rc: true,
            rc_file: None,
            global_rc: false,
            dotenv: None,
            environment: None,
            env_name: EnvName::default(),
            package_json: PackageJsonFields::default(),
            defaults: None,
            default_config: None,
            overrides: None,
            omit_dollar_keys: false,
            context: ConfigFunctionContext::default(),
            resolver: None,
            module_loader: Arc::new(LiteralModuleLoader),
            remote: RemoteOptions::default(),
            merger: None,
            extend: Some(ExtendOptions::default()),
            config_file_required: false,
            validator: None,
        }
    }
}

impl LoadConfigOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_config_file(mut self, config_file: impl Into<String>) -> Self {
        self.config_file = Some(config_file.into());
        self
    }

    pub fn with_rc_file(mut self, rc_file: impl Into<String>) -> Self {
        self.rc = true;
        self.rc_file = Some(rc_file.into());
        self
    }

    pub fn without_rc(mut self) -> Self {
        self.rc = false;
        self
    }

    pub fn with_global_rc(mut self, global_rc: bool) -> Self {
        self.global_rc = global_rc;
        self
    }

    pub fn with_dotenv(mut self, dotenv: DotenvOptions) -> Self {
        self.dotenv = Some(dotenv);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_env_name(mut self, env_name: impl Into<String>) -> Self {
        self.env_name = EnvName::Named(env_name.into());
        self
    }

    pub fn without_env_overlay(mut self) -> Self {
        self.env_name = EnvName::Disabled;
        self
    }

    pub fn with_package_json(mut self, fields: PackageJsonFields) -> Self {
        self.package_json = fields;
        self
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn with_default_config(mut self, default_config: impl Into<ResolvableConfig>) -> Self {
        self.default_config = Some(default_config.into());
        self
    }

    pub fn with_overrides(mut self, overrides: impl Into<ResolvableConfig>) -> Self {
        self.overrides = Some(overrides.into());
        self
    }

    pub fn omit_dollar_keys(mut self, omit: bool) -> Self {
        self.omit_dollar_keys = omit;
        self
    }

    pub fn with_context(mut self, context: ConfigFunctionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LayerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_module_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.module_loader = loader;
        self
    }

    pub fn with_remote(mut self, remote: RemoteOptions) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_merger(mut self, merger: Merger) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn with_extend(mut self, extend: ExtendOptions) -> Self {
        self.extend = Some(extend);
        self
    }

    pub fn without_extend(mut self) -> Self {
        self.extend = None;
        self
    }

    pub fn require_config_file(mut self, required: bool) -> Self {
        self.config_file_required = required;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ConfigValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Main file stem derived from the logical name.
    pub fn config_file_name(&self) -> String {
        self.config_file.clone().unwrap_or_else(|| {
            if self.name == "config" {
                "config".to_string()
            } else {
                format!("{}.config", self.name)
            }
        })
    }

    /// RC file name derived from the logical name, `None` when RC loading is off.
    pub fn rc_file_name(&self) -> Option<String> {
        if !self.rc {
            return None;
        }
        Some(
            self.rc_file
                .clone()
                .unwrap_or_else(|| format!(".{}rc", self.name)),
        )
    }
}

impl fmt::Debug for LoadConfigOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadConfigOptions")
            .field("cwd", &self.cwd)
            .field("name", &self.name)
            .field("config_file", &self.config_file)
            .field("rc", &self.rc)
            .field("rc_file", &self.rc_file)
            .field("global_rc", &self.global_rc)
            .field("dotenv", &self.dotenv)
            .field("env_name", &self.env_name)
            .field("package_json", &self.package_json)
            .field("defaults", &self.defaults)
            .field("default_config", &self.default_config)
            .field("overrides", &self.overrides)
            .field("omit_dollar_keys", &self.omit_dollar_keys)
            .field("resolver", &self.resolver.is_some())
            .field("merger", &self.merger.is_some())
            .field("extend", &self.extend)
            .field("config_file_required", &self.config_file_required)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Normalized options threaded through layer resolution.
///
/// Built once per `load_config` call; `with_cwd` rebases it for nested layers.
#[derive(Clone)]
pub struct ResolveOptions {
    pub cwd: PathBuf,
    pub name: String,
    pub config_file: String,
    pub env_name: Option<String>,
    pub environment: Arc<Environment>,
    pub context: ConfigFunctionContext,
    pub resolver: Option<Arc<dyn LayerResolver>>,
    pub module_loader: Arc<dyn ModuleLoader>,
    pub remote: RemoteOptions,
    pub merger: Option<Merger>,
    pub extend: ExtendOptions,
}

impl ResolveOptions {
    /// Options for resolving a bare directory with default collaborators.
    pub fn new(cwd: impl Into<PathBuf>, config_file: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            name: "config".to_string(),
            config_file: config_file.into(),
            env_name: None,
            environment: Arc::new(Environment::default()),
            context: ConfigFunctionContext::default(),
            resolver: None,
            module_loader: Arc::new(LiteralModuleLoader),
            remote: RemoteOptions::default(),
            merger: None,
            extend: ExtendOptions::default(),
        }
    }

    pub fn with_cwd(&self, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..self.clone()
        }
    }

    pub fn with_env_name(mut self, env_name: Option<String>) -> Self {
        self.env_name = env_name;
        self
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("cwd", &self.cwd)
            .field("name", &self.name)
            .field("config_file", &self.config_file)
            .field("env_name", &self.env_name)
            .field("extend", &self.extend)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derived_file_names() {
        let opts = LoadConfigOptions::default();
        assert_eq!(opts.config_file_name(), "config");
        assert_eq!(opts.rc_file_name().as_deref(), Some(".configrc"));

        let opts = LoadConfigOptions::new("foo");
        assert_eq!(opts.config_file_name(), "foo.config");
        assert_eq!(opts.rc_file_name().as_deref(), Some(".foorc"));

        let opts = LoadConfigOptions::new("foo").without_rc();
        assert_eq!(opts.rc_file_name(), None);
    }

    #[test]
    fn test_source_options_deserialize_keeps_unknown_keys() {
        let opts: SourceOptions = serde_json::from_value(json!({
            "meta": {"name": "base"},
            "install": true,
            "giget": {"provider": "github"},
            "userMeta": 123
        }))
        .unwrap();
        assert_eq!(opts.meta.unwrap()["name"], "base");
        assert!(opts.install);
        assert_eq!(opts.fetch.unwrap().provider.as_deref(), Some("github"));
        assert_eq!(opts.extra["userMeta"], 123);
    }

    #[test]
    fn test_empty_source_options() {
        assert!(SourceOptions::default().is_empty());
        let opts: SourceOptions = serde_json::from_value(json!({})).unwrap();
        assert!(opts.is_empty());
    }

    #[tokio::test]
    async fn test_resolvable_from_fn_sees_siblings() {
        let resolvable = ResolvableConfig::from_fn(|ctx| {
            ctx.configs
                .main
                .as_ref()
                .filter(|m| m["enableDefault"] == json!(true))
                .map(|_| json!({"extends": ["virtual"]}))
        });
        let ctx = ResolvableConfigContext {
            configs: ConfigSources {
                main: Some(json!({"enableDefault": true})),
                ..Default::default()
            },
        };
        assert_eq!(
            resolvable.resolve(&ctx).await.unwrap(),
            Some(json!({"extends": ["virtual"]}))
        );
        let empty = ResolvableConfigContext::default();
        assert_eq!(resolvable.resolve(&empty).await.unwrap(), None);
    }

    #[test]
    fn test_has_config() {
        assert!(!ResolvedLayer::default().has_config());
        assert!(!ResolvedLayer::virtual_layer(json!({})).has_config());
        assert!(ResolvedLayer::virtual_layer(json!({"a": 1})).has_config());
    }
}
