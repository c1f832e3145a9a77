//! `package.json` lookup and workspace root detection.

use super::locate::{is_dir, is_file};
use crate::error::{ConfigError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PACKAGE_JSON: &str = "package.json";

/// Files that mark a monorepo root.
const WORKSPACE_MARKERS: &[&str] = &[
    "pnpm-workspace.yaml",
    "lerna.json",
    "turbo.json",
    "rush.json",
];

const LOCKFILES: &[&str] = &[
    "yarn.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    "npm-shrinkwrap.json",
    "bun.lockb",
    "bun.lock",
];

/// Nearest `package.json` at or above `cwd`.
pub async fn find_package_json(cwd: &Path) -> Option<PathBuf> {
    for dir in cwd.ancestors() {
        let candidate = dir.join(PACKAGE_JSON);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Read and parse the nearest `package.json`.
pub async fn read_package_json(cwd: &Path) -> Result<Option<(PathBuf, Value)>> {
    let Some(path) = find_package_json(cwd).await else {
        return Ok(None);
    };
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ConfigError::io(&path, e))?;
    let manifest = serde_json::from_str(&content).map_err(|e| ConfigError::parse(&path, e))?;
    debug!("Read manifest {}", path.display());
    Ok(Some((path, manifest)))
}

async fn find_upwards(cwd: &Path, names: &[&str]) -> Option<PathBuf> {
    for dir in cwd.ancestors() {
        for name in names {
            if tokio::fs::metadata(dir.join(name)).await.is_ok() {
                return Some(dir.to_path_buf());
            }
        }
    }
    None
}

/// Root of the workspace containing `cwd`.
///
/// Looks upwards for a workspace marker, then a `.git` directory, then a lockfile.
pub async fn find_workspace_dir(cwd: &Path) -> Option<PathBuf> {
    if let Some(dir) = find_upwards(cwd, WORKSPACE_MARKERS).await {
        return Some(dir);
    }
    for dir in cwd.ancestors() {
        if is_dir(&dir.join(".git")).await {
            return Some(dir.to_path_buf());
        }
    }
    find_upwards(cwd, LOCKFILES).await
}
