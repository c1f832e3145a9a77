//! Config file discovery.
//!
//! Finds the concrete file behind a logical name (`config`, `app.config`) in a
//! directory and its `.config/` subdirectory, and resolves bare package specifiers
//! against `node_modules`.

use regex_lite::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Supported config file extensions, in lookup priority order.
///
/// Module formats first, then structured-data formats.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // module formats
    ".js", ".ts", ".mjs", ".cjs", ".mts", ".cts", ".json",
    // structured data
    ".jsonc", ".json5", ".yaml", ".yml", ".toml",
];

// https://github.com/dword-design/package-name-regex
static PACKAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@[\da-z~-][\d._a-z~-]*/)?[\da-z~-][\d._a-z~-]*($|/.*)")
        .expect("package name pattern is valid")
});

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Resolve `path` as a module path: the exact file, or the file with one of the
/// supported extensions appended.
pub async fn try_resolve(path: &Path) -> Option<PathBuf> {
    if is_file(path).await {
        return Some(path.to_path_buf());
    }
    for ext in SUPPORTED_EXTENSIONS {
        let candidate = with_suffix(path, ext);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Find the config file for `logical_name` inside `base_dir`.
///
/// Tries `<dir>/<name>`, then `<dir>/.config/<name>`, then
/// `<dir>/.config/<name without trailing .config>`. A missing file is `None`.
pub async fn locate(base_dir: &Path, logical_name: &str) -> Option<PathBuf> {
    let dot_config = base_dir.join(".config");
    let mut candidates = vec![base_dir.join(logical_name), dot_config.join(logical_name)];
    if let Some(stem) = logical_name.strip_suffix(".config")
        && !stem.is_empty()
    {
        candidates.push(dot_config.join(stem));
    }

    for candidate in candidates {
        if let Some(found) = try_resolve(&candidate).await {
            debug!("Located {} for `{}`", found.display(), logical_name);
            return Some(found);
        }
    }
    None
}

/// Every path `locate` may probe for `logical_name` in `base_dir`.
pub fn candidate_paths(base_dir: &Path, logical_name: &str) -> Vec<PathBuf> {
    let dot_config = base_dir.join(".config");
    let stem = logical_name.strip_suffix(".config").unwrap_or(logical_name);
    SUPPORTED_EXTENSIONS
        .iter()
        .flat_map(|ext| {
            [
                base_dir.join(format!("{logical_name}{ext}")),
                dot_config.join(format!("{logical_name}{ext}")),
                dot_config.join(format!("{stem}{ext}")),
            ]
        })
        .collect()
}

/// True for explicit relative or absolute filesystem references.
pub fn is_path_like(source: &str) -> bool {
    source.starts_with('.')
        || source.starts_with('/')
        || source.starts_with('\\')
        || Path::new(source).is_absolute()
}

/// True when `source` looks like an npm-style package specifier.
pub fn is_package_specifier(source: &str) -> bool {
    !is_path_like(source) && PACKAGE_NAME_RE.is_match(source)
}

/// A reference denotes a directory when it has no extension, or when its only
/// "extension" is the whole basename (dotfile-only names such as `.base`).
pub fn is_directory_reference(source: &str) -> bool {
    let path = Path::new(source);
    match (path.extension(), path.file_name()) {
        (None, _) => true,
        (Some(ext), Some(name)) => {
            let mut dotted = std::ffi::OsString::from(".");
            dotted.push(ext);
            dotted == name
        }
        (Some(_), None) => true,
    }
}

/// Split `@scope/name/sub/path` into (`@scope/name`, `sub/path`).
fn split_package(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut idx = 0;
    let mut seen = 0;
    for (i, c) in specifier.char_indices() {
        if c == '/' {
            seen += 1;
            if seen == name_segments {
                idx = i;
                break;
            }
        }
    }
    if idx == 0 {
        (specifier, None)
    } else {
        let rest = &specifier[idx + 1..];
        (&specifier[..idx], (!rest.is_empty()).then_some(rest))
    }
}

/// Resolve a bare package specifier by walking up from `cwd` through
/// `node_modules` directories.
///
/// Returns the package's `main` entry when declared, a file under a sub path, or the
/// package directory itself so the caller can locate a config file within it.
pub async fn resolve_package(specifier: &str, cwd: &Path) -> Option<PathBuf> {
    let (name, sub_path) = split_package(specifier);
    for dir in cwd.ancestors() {
        let package_dir = dir.join("node_modules").join(name);
        if !is_dir(&package_dir).await {
            continue;
        }
        if let Some(sub_path) = sub_path {
            let target = package_dir.join(sub_path);
            if let Some(found) = try_resolve(&target).await {
                return Some(found);
            }
            if is_dir(&target).await {
                return Some(target);
            }
            return None;
        }
        if let Some(main) = package_main(&package_dir).await
            && let Some(found) = try_resolve(&package_dir.join(main)).await
        {
            return Some(found);
        }
        return Some(package_dir);
    }
    None
}

async fn package_main(package_dir: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(package_dir.join("package.json"))
        .await
        .ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&content).ok()?;
    manifest
        .get("main")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// Join `reference` onto `base` and fold `.` and `..` lexically.
///
/// An absolute `reference` replaces `base`. Symlinks are not followed.
pub fn join_clean(base: &Path, reference: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in base.join(reference).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Use forward slashes regardless of platform.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    PathBuf::from(normalize_separators(&path.to_string_lossy()))
}
