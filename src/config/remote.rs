//! Remote layer sources.
//!
//! A source starting with a known prefix (`gh:`, `github:`, `gitlab:`,
//! `bitbucket:`, `https://`, `http://`) is fetched into a local cache directory and
//! the directory then stands in for the source.

use super::dotenv::Environment;
use super::fetch::{FetchOptions, FetchRequest, RemoteFetcher, TarballFetcher};
use super::locate::is_dir;
use super::types::{ResolveOptions, SourceOptions};
use crate::error::{ConfigError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Source prefixes routed to the fetcher.
pub const REMOTE_PREFIXES: &[&str] = &[
    "gh:",
    "github:",
    "gitlab:",
    "bitbucket:",
    "https://",
    "http://",
];

/// Overrides the cache root when set.
pub const CACHE_DIR_ENV: &str = "CONFSTACK_CACHE_DIR";

const CACHE_NAMESPACE: &str = "c12";
const HASH_LEN: usize = 10;

/// How remote sources are handled.
#[derive(Clone)]
pub struct RemoteOptions {
    /// When false, remote-looking sources are treated as local paths.
    pub enabled: bool,
    pub fetcher: Arc<dyn RemoteFetcher>,
    /// Defaults for every fetch; per-reference `giget` options win.
    pub fetch: FetchOptions,
    /// Additional prefixes to treat as remote, e.g. for custom providers.
    pub extra_prefixes: Vec<String>,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            fetcher: Arc::new(TarballFetcher::new()),
            fetch: FetchOptions::default(),
            extra_prefixes: Vec::new(),
        }
    }
}

impl fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("enabled", &self.enabled)
            .field("fetch", &self.fetch)
            .field("extra_prefixes", &self.extra_prefixes)
            .finish_non_exhaustive()
    }
}

impl RemoteOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.extra_prefixes.push(prefix.into());
        self
    }

    /// True when `source` should be fetched.
    pub fn is_remote(&self, source: &str) -> bool {
        self.enabled
            && (is_remote(source)
                || self
                    .extra_prefixes
                    .iter()
                    .any(|p| source.starts_with(p.as_str())))
    }
}

/// True when `source` starts with one of [`REMOTE_PREFIXES`].
pub fn is_remote(source: &str) -> bool {
    REMOTE_PREFIXES.iter().any(|p| source.starts_with(p))
}

/// Stable, filesystem-safe cache directory name for `source`.
///
/// The first three word runs of the source plus a short content hash, e.g.
/// `gh_unjs_c12_Xr8kS0aPqa`.
pub fn cache_key(source: &str) -> String {
    let mut readable = String::with_capacity(source.len());
    let mut in_gap = false;
    for c in source.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            readable.push(c);
            in_gap = false;
        } else if !in_gap {
            readable.push('_');
            in_gap = true;
        }
    }
    let prefix = readable.split('_').take(3).collect::<Vec<_>>().join("_");

    let digest = Sha256::digest(source.as_bytes());
    let mut hash = URL_SAFE_NO_PAD.encode(digest);
    hash.truncate(HASH_LEN);
    format!("{prefix}_{hash}")
}

/// Directory a remote source with `key` is cached in, relative to `cwd`.
///
/// In order: `$CONFSTACK_CACHE_DIR/<key>`, a sibling when `cwd` itself lives in a
/// `.c12` cache, `<cwd>/node_modules/.c12/<key>` when `node_modules` exists, then
/// `$XDG_CACHE_HOME/c12/<key>` or `~/.cache/c12/<key>`.
pub async fn cache_dir(cwd: &Path, key: &str, env: &Environment) -> PathBuf {
    if let Some(root) = env.get(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(root).join(key);
    }
    if let Some(parent) = cwd.parent()
        && parent.file_name().is_some_and(|n| n == ".c12")
    {
        return parent.join(key);
    }
    let node_modules = cwd.join("node_modules");
    if is_dir(&node_modules).await {
        return node_modules.join(".c12").join(key);
    }
    if let Some(xdg) = env.get("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join(CACHE_NAMESPACE).join(key);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join(CACHE_NAMESPACE)
        .join(key)
}

/// Fetch `source` and return the local directory that replaces it.
///
/// Without `install` the cache directory is cleared first so every load sees a
/// fresh copy; with `install` an existing directory is extracted over.
pub async fn resolve_remote(
    source: &str,
    options: &ResolveOptions,
    source_options: &SourceOptions,
) -> Result<PathBuf> {
    let dir = cache_dir(&options.cwd, &cache_key(source), &options.environment).await;

    if !source_options.install && is_dir(&dir).await {
        debug!("Clearing cached remote layer {}", dir.display());
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| ConfigError::io(&dir, e))?;
    }

    let base = FetchOptions {
        force: Some(source_options.install),
        auth: source_options.auth.clone(),
        ..Default::default()
    };
    let fetch_options = base
        .overlay(&options.remote.fetch)
        .overlay(&source_options.fetch.clone().unwrap_or_default());

    let request = FetchRequest {
        source: source.to_string(),
        dir,
        options: fetch_options,
    };
    options
        .remote
        .fetcher
        .fetch(&request)
        .await
        .map_err(|e| ConfigError::remote(source, &options.cwd, e))
}
