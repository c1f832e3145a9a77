//! `.env` loading.
//!
//! Environment variables are held in an explicit [`Environment`] value rather than
//! written into the process environment. The environment remembers which keys were
//! populated from dotenv files: those stay overridable by later loads, while keys
//! that came from the process or the caller are only replaced with `override_existing`.

use crate::error::{ConfigError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A set of environment variables plus the keys that originated from dotenv files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
    from_files: BTreeSet<String>,
}

impl Environment {
    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            from_files: BTreeSet::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set a variable owned by the caller.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.from_files.remove(&key);
        self.vars.insert(key, value.into());
    }

    fn set_from_file(&mut self, key: String, value: String) {
        self.from_files.insert(key.clone());
        self.vars.insert(key, value);
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// True when `key` was last written by a dotenv file.
    pub fn is_from_file(&self, key: &str) -> bool {
        self.from_files.contains(key)
    }

    /// Keys populated from dotenv files.
    pub fn file_keys(&self) -> impl Iterator<Item = &str> {
        self.from_files.iter().map(String::as_str)
    }
}

/// Options for [`load_dotenv`] and [`setup_dotenv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotenvOptions {
    /// Directory holding the files; defaults to the loader's working directory.
    pub cwd: Option<PathBuf>,
    /// Files to read in order; later files win.
    pub file_names: Vec<String>,
    /// Replace variables that did not come from a dotenv file.
    pub override_existing: bool,
}

impl Default for DotenvOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            file_names: vec![".env".to_string()],
            override_existing: false,
        }
    }
}

impl DotenvOptions {
    pub fn with_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn override_existing(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

/// Parse the configured dotenv files. Missing files are skipped.
///
/// `${VAR}` references are expanded by the parser against earlier entries and the
/// process environment.
pub fn read_dotenv_files(cwd: &Path, options: &DotenvOptions) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    for name in &options.file_names {
        let path = cwd.join(name);
        if !path.is_file() {
            continue;
        }
        debug!("Reading dotenv file {}", path.display());
        let iter = dotenvy::from_path_iter(&path).map_err(|e| dotenv_error(&path, e))?;
        for item in iter {
            let (key, value) = item.map_err(|e| dotenv_error(&path, e))?;
            entries.insert(key, value);
        }
    }
    Ok(entries)
}

fn dotenv_error(path: &Path, err: dotenvy::Error) -> ConfigError {
    ConfigError::Dotenv {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Load dotenv files and combine them with `env`.
///
/// Variables already present in `env` win unless `override_existing` is set or they
/// were themselves loaded from a dotenv file earlier.
pub fn load_dotenv(
    cwd: &Path,
    options: &DotenvOptions,
    env: &Environment,
) -> Result<BTreeMap<String, String>> {
    let mut combined = read_dotenv_files(cwd, options)?;
    for (key, value) in env.vars() {
        if key.starts_with('_') {
            continue;
        }
        let file_wins = combined.contains_key(key)
            && (options.override_existing || env.is_from_file(key));
        if !file_wins {
            combined.insert(key.clone(), value.clone());
        }
    }
    Ok(combined)
}

/// Load dotenv files into `env` and return the entries read from files.
///
/// Keys starting with `_` are never applied.
pub fn setup_dotenv(
    cwd: &Path,
    options: &DotenvOptions,
    env: &mut Environment,
) -> Result<BTreeMap<String, String>> {
    let entries = read_dotenv_files(cwd, options)?;
    for (key, value) in &entries {
        if key.starts_with('_') {
            continue;
        }
        if options.override_existing || env.get(key).is_none() || env.is_from_file(key) {
            env.set_from_file(key.clone(), value.clone());
        }
    }
    Ok(entries)
}
