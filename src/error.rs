//! Structured error types for configuration loading.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A single issue reported by a [`ConfigValidator`](crate::config::ConfigValidator).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    pub message: String,
    /// Dotted path of the offending key, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Errors raised while resolving configuration layers.
///
/// Absence is never an error: a missing config file, an empty overlay or an empty
/// source option block are represented by `None`/empty values. Everything here is
/// fatal to the `load_config` call that raised it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config file extension `{extension}` ({})", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("failed to load config module {}: {message}", path.display())]
    ModuleLoad { path: PathBuf, message: String },

    #[error("required config file `{name}` not found in {}", cwd.display())]
    MissingConfigFile { name: String, cwd: PathBuf },

    #[error("failed to fetch remote layer `{source_ref}` in {}: {reason}", cwd.display())]
    Remote {
        source_ref: String,
        cwd: PathBuf,
        reason: String,
    },

    #[error("cannot extend config from `{entry}` in {}", cwd.display())]
    InvalidExtendsEntry { entry: String, cwd: PathBuf },

    #[error("cannot extend config from `{source_ref}` in {}: nothing was found", cwd.display())]
    ExtendsNotFound { source_ref: String, cwd: PathBuf },

    #[error("circular extends: {}", format_chain(.chain))]
    ExtendsCycle { chain: Vec<PathBuf> },

    #[error("config validation failed: {}", format_issues(.issues))]
    Validation { issues: Vec<ValidationIssue> },

    #[error("failed to load dotenv file {}: {message}", path.display())]
    Dotenv { path: PathBuf, message: String },

    #[error("invalid rc file {}: {message}", path.display())]
    Rc { path: PathBuf, message: String },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl ConfigError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn parse(path: impl AsRef<Path>, err: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn remote(source_ref: &str, cwd: &Path, err: impl fmt::Display) -> Self {
        Self::Remote {
            source_ref: source_ref.to_string(),
            cwd: cwd.to_path_buf(),
            reason: err.to_string(),
        }
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_chain() {
        let err = ConfigError::ExtendsCycle {
            chain: vec![PathBuf::from("/a/config.json"), PathBuf::from("/b/config.json")],
        };
        assert_eq!(
            err.to_string(),
            "circular extends: /a/config.json -> /b/config.json"
        );
    }

    #[test]
    fn test_validation_message_includes_paths() {
        let err = ConfigError::Validation {
            issues: vec![
                ValidationIssue::new("expected a number").at("server.port"),
                ValidationIssue::new("unknown key"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "config validation failed: server.port: expected a number; unknown key"
        );
    }

    #[test]
    fn test_remote_error_names_source_and_cwd() {
        let err = ConfigError::remote("gh:org/repo", Path::new("/work"), "404 Not Found");
        let msg = err.to_string();
        assert!(msg.contains("gh:org/repo"));
        assert!(msg.contains("/work"));
        assert!(msg.contains("404"));
    }

    #[test]
    fn test_watcher_errors_convert() {
        let err: ConfigError = notify::Error::generic("inotify limit reached").into();
        assert!(matches!(err, ConfigError::Watch(_)));
        assert!(err.to_string().starts_with("file watcher error:"));
    }
}
