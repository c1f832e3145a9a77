//! Remote template fetching.
//!
//! Sources look like `gh:owner/repo/sub/dir#ref`, `gitlab:group/repo`,
//! `bitbucket:team/repo` or a direct `https://` tarball URL. [`TarballFetcher`]
//! downloads the archive for the ref, strips the archive's top-level directory and
//! the requested sub directory, and extracts the rest into the target directory.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_PROVIDER: &str = "github";
const DEFAULT_REF: &str = "main";
const USER_AGENT: &str = concat!("confstack/", env!("CARGO_PKG_VERSION"));

/// Options forwarded to the fetcher.
///
/// Set globally through [`RemoteOptions`](super::remote::RemoteOptions) and per
/// reference through the `giget` source option. Fields left unset fall through to
/// the lower level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    /// Provider used when the source has no `provider:` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Extract into a non-empty directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    /// Remove the target directory before extracting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_clean: Option<bool>,
    /// Bearer token for private repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl FetchOptions {
    /// Layer `over` on top of `self`: set fields in `over` win.
    pub fn overlay(self, over: &FetchOptions) -> FetchOptions {
        FetchOptions {
            provider: over.provider.clone().or(self.provider),
            force: over.force.or(self.force),
            force_clean: over.force_clean.or(self.force_clean),
            auth: over.auth.clone().or(self.auth),
        }
    }
}

/// A single download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source: String,
    /// Directory the template is extracted into.
    pub dir: PathBuf,
    pub options: FetchOptions,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid template source `{0}`")]
    InvalidSource(String),

    #[error("unsupported provider `{0}`")]
    UnsupportedProvider(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("destination {} already exists and is not empty", .0.display())]
    DirNotEmpty(PathBuf),

    #[error("path traversal detected in archive: {0}")]
    PathTraversal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads remote sources into a local directory.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `request.source` and return the directory holding its contents.
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, FetchError>;
}

/// A parsed template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub provider: String,
    /// `owner/repo` for git hosts, the full URL for `http`.
    pub repo: String,
    /// Path inside the archive, without leading or trailing slashes.
    pub subdir: String,
    pub git_ref: String,
}

impl TemplateSource {
    /// Parse `provider:owner/repo/sub/dir#ref`.
    pub fn parse(input: &str, default_provider: Option<&str>) -> Result<Self, FetchError> {
        if input.starts_with("https://") || input.starts_with("http://") {
            return Ok(Self {
                provider: "http".to_string(),
                repo: input.to_string(),
                subdir: String::new(),
                git_ref: String::new(),
            });
        }

        let (provider, rest) = match input.split_once(':') {
            Some((provider, rest))
                if !provider.is_empty()
                    && provider
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') =>
            {
                (provider, rest)
            }
            _ => (default_provider.unwrap_or(DEFAULT_PROVIDER), input),
        };
        let provider = match provider {
            "gh" => "github",
            other => other,
        };

        let (path, git_ref) = match rest.split_once('#') {
            Some((path, git_ref)) if !git_ref.is_empty() => (path, git_ref),
            Some((path, _)) => (path, DEFAULT_REF),
            None => (rest, DEFAULT_REF),
        };

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let (Some(owner), Some(name)) = (segments.next(), segments.next()) else {
            return Err(FetchError::InvalidSource(input.to_string()));
        };
        let subdir = segments.collect::<Vec<_>>().join("/");

        Ok(Self {
            provider: provider.to_string(),
            repo: format!("{owner}/{name}"),
            subdir,
            git_ref: git_ref.to_string(),
        })
    }
}

/// Download `.tar.gz` archives from git hosts or plain URLs.
#[derive(Debug, Clone)]
pub struct TarballFetcher {
    client: reqwest::Client,
    /// Extra providers: name to URL template with `{repo}` and `{ref}` placeholders.
    providers: BTreeMap<String, String>,
}

impl Default for TarballFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TarballFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            providers: BTreeMap::new(),
        }
    }

    /// Register a provider, e.g. `("internal", "https://git.example.com/{repo}/archive/{ref}.tar.gz")`.
    pub fn with_provider(mut self, name: impl Into<String>, url_template: impl Into<String>) -> Self {
        self.providers.insert(name.into(), url_template.into());
        self
    }

    /// Archive URL for a parsed source.
    pub fn tarball_url(&self, source: &TemplateSource) -> Result<String, FetchError> {
        let repo = &source.repo;
        let git_ref = &source.git_ref;
        let url = match source.provider.as_str() {
            "http" => repo.clone(),
            "github" => format!("https://codeload.github.com/{repo}/tar.gz/{git_ref}"),
            "gitlab" => format!(
                "https://gitlab.com/api/v4/projects/{}/repository/archive.tar.gz?sha={}",
                urlencoding::encode(repo),
                urlencoding::encode(git_ref)
            ),
            "bitbucket" => format!("https://bitbucket.org/{repo}/get/{git_ref}.tar.gz"),
            other => match self.providers.get(other) {
                Some(template) => template.replace("{repo}", repo).replace("{ref}", git_ref),
                None => return Err(FetchError::UnsupportedProvider(other.to_string())),
            },
        };
        Ok(url)
    }

    async fn download(&self, url: &str, auth: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = auth {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl RemoteFetcher for TarballFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, FetchError> {
        let source = TemplateSource::parse(&request.source, request.options.provider.as_deref())?;
        let url = self.tarball_url(&source)?;
        prepare_dir(&request.dir, &request.options).await?;

        info!("Downloading {} from {}", request.source, url);
        let bytes = self.download(&url, request.options.auth.as_deref()).await?;

        let dir = request.dir.clone();
        let subdir = source.subdir.clone();
        tokio::task::spawn_blocking(move || extract_tar_gz(&bytes[..], &dir, &subdir))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;

        debug!("Extracted {} into {}", request.source, request.dir.display());
        Ok(request.dir.clone())
    }
}

/// Make sure `dir` can receive an extraction.
pub(crate) async fn prepare_dir(dir: &Path, options: &FetchOptions) -> Result<(), FetchError> {
    if options.force_clean.unwrap_or(false) && tokio::fs::metadata(dir).await.is_ok() {
        tokio::fs::remove_dir_all(dir).await?;
    }
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await
        && entries.next_entry().await?.is_some()
        && !options.force.unwrap_or(false)
    {
        return Err(FetchError::DirNotEmpty(dir.to_path_buf()));
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Extract a gzipped tarball into `dest_dir`.
///
/// The archive's first path component is dropped. When `subdir` is non-empty only
/// entries under it are extracted, relative to it.
pub fn extract_tar_gz<R: Read>(reader: R, dest_dir: &Path, subdir: &str) -> Result<(), FetchError> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let subdir: PathBuf = subdir.split('/').filter(|s| !s.is_empty()).collect();
    std::fs::create_dir_all(dest_dir)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let mut components = path.components();
        components.next();
        let stripped = components.as_path();
        let Ok(relative) = stripped.strip_prefix(&subdir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FetchError::PathTraversal(relative.display().to_string()));
        }

        let outpath = dest_dir.join(relative);
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&outpath)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_parse_github_with_subdir_and_ref() {
        let source = TemplateSource::parse("gh:unjs/c12/test/fixture#v1.0", None).unwrap();
        assert_eq!(source.provider, "github");
        assert_eq!(source.repo, "unjs/c12");
        assert_eq!(source.subdir, "test/fixture");
        assert_eq!(source.git_ref, "v1.0");
    }

    #[test]
    fn test_parse_defaults() {
        let source = TemplateSource::parse("owner/repo", None).unwrap();
        assert_eq!(source.provider, "github");
        assert_eq!(source.subdir, "");
        assert_eq!(source.git_ref, "main");

        let source = TemplateSource::parse("owner/repo", Some("gitlab")).unwrap();
        assert_eq!(source.provider, "gitlab");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            TemplateSource::parse("gh:onlyowner", None),
            Err(FetchError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_tarball_urls() {
        let fetcher = TarballFetcher::new()
            .with_provider("internal", "https://git.example.com/{repo}/archive/{ref}.tar.gz");
        let url = |s: &str| fetcher.tarball_url(&TemplateSource::parse(s, None).unwrap());

        assert_eq!(
            url("github:a/b#dev").unwrap(),
            "https://codeload.github.com/a/b/tar.gz/dev"
        );
        assert_eq!(
            url("gitlab:a/b").unwrap(),
            "https://gitlab.com/api/v4/projects/a%2Fb/repository/archive.tar.gz?sha=main"
        );
        assert_eq!(
            url("bitbucket:a/b").unwrap(),
            "https://bitbucket.org/a/b/get/main.tar.gz"
        );
        assert_eq!(
            url("https://example.com/t.tar.gz").unwrap(),
            "https://example.com/t.tar.gz"
        );
        assert_eq!(
            url("internal:a/b#v2").unwrap(),
            "https://git.example.com/a/b/archive/v2.tar.gz"
        );
        assert!(matches!(
            url("sourcehut:a/b"),
            Err(FetchError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_extract_strips_root_and_subdir() {
        let temp = TempDir::new().unwrap();
        let bytes = tarball(&[
            ("repo-main/README.md", "readme"),
            ("repo-main/theme/config.json", "{\"a\":1}"),
            ("repo-main/theme/nested/x.yaml", "b: 2"),
        ]);

        extract_tar_gz(&bytes[..], temp.path(), "theme").unwrap();
        assert_eq!(
            std::fs::read_to_string(temp.path().join("config.json")).unwrap(),
            "{\"a\":1}"
        );
        assert!(temp.path().join("nested/x.yaml").exists());
        assert!(!temp.path().join("README.md").exists());
    }

    #[test]
    fn test_extract_without_subdir() {
        let temp = TempDir::new().unwrap();
        let bytes = tarball(&[("root/config.json", "{}")]);
        extract_tar_gz(&bytes[..], temp.path(), "").unwrap();
        assert!(temp.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn test_prepare_dir_rejects_non_empty_without_force() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("old.txt"), "x").unwrap();

        let err = prepare_dir(temp.path(), &FetchOptions::default()).await;
        assert!(matches!(err, Err(FetchError::DirNotEmpty(_))));

        let force = FetchOptions {
            force: Some(true),
            ..Default::default()
        };
        prepare_dir(temp.path(), &force).await.unwrap();
        assert!(temp.path().join("old.txt").exists());

        let clean = FetchOptions {
            force_clean: Some(true),
            ..Default::default()
        };
        prepare_dir(temp.path(), &clean).await.unwrap();
        assert!(!temp.path().join("old.txt").exists());
        assert!(temp.path().is_dir());
    }

    #[test]
    fn test_overlay_prefers_set_fields() {
        let base = FetchOptions {
            provider: Some("gitlab".into()),
            auth: Some("base".into()),
            ..Default::default()
        };
        let over = FetchOptions {
            auth: Some("token".into()),
            force: Some(true),
            ..Default::default()
        };
        let merged = base.overlay(&over);
        assert_eq!(merged.provider.as_deref(), Some("gitlab"));
        assert_eq!(merged.auth.as_deref(), Some("token"));
        assert_eq!(merged.force, Some(true));
    }
}
