//! Remote layers resolved through a fake fetcher.

use async_trait::async_trait;
use confstack::config::fetch::FetchError;
use confstack::config::remote::CACHE_DIR_ENV;
use confstack::config::{
    Environment, FetchRequest, LoadConfigOptions, RemoteFetcher, RemoteOptions, load_config,
};
use confstack::error::ConfigError;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Writes a fixed config into the requested directory.
#[derive(Default)]
struct FixtureFetcher {
    requests: Mutex<Vec<FetchRequest>>,
}

#[async_trait]
impl RemoteFetcher for FixtureFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        if request.dir.exists() && request.options.force != Some(true) {
            return Err(FetchError::DirNotEmpty(request.dir.clone()));
        }
        tokio::fs::create_dir_all(&request.dir).await?;
        tokio::fs::write(
            request.dir.join("config.json"),
            r#"{ "remote": true, "colors": { "primary": "remote", "accent": "remote" } }"#,
        )
        .await?;
        Ok(request.dir.clone())
    }
}

struct OfflineFetcher;

#[async_trait]
impl RemoteFetcher for OfflineFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, FetchError> {
        Err(FetchError::HttpStatus {
            status: 404,
            url: request.source.clone(),
        })
    }
}

fn options(cwd: &Path, cache: &Path, fetcher: Arc<dyn RemoteFetcher>) -> LoadConfigOptions {
    LoadConfigOptions::default()
        .with_cwd(cwd)
        .with_environment(Environment::from_vars([(
            CACHE_DIR_ENV,
            cache.to_string_lossy().into_owned(),
        )]))
        .with_remote(RemoteOptions::default().with_fetcher(fetcher))
}

#[tokio::test]
async fn test_remote_layer_is_merged() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    fs::write(
        temp.path().join("config.json"),
        r#"{ "extends": "gh:org/theme", "colors": { "primary": "user" } }"#,
    )
    .unwrap();
    let fetcher = Arc::new(FixtureFetcher::default());

    let resolved = load_config(options(temp.path(), &cache, fetcher.clone()))
        .await
        .unwrap();
    assert_eq!(
        resolved.config,
        json!({ "remote": true, "colors": { "primary": "user", "accent": "remote" } })
    );

    let layer = &resolved.layers[1];
    assert_eq!(layer.source.as_deref(), Some("gh:org/theme"));
    assert!(layer.cwd.as_ref().unwrap().starts_with(&cache));

    let requests = fetcher.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].source, "gh:org/theme");
}

#[tokio::test]
async fn test_repeated_loads_reuse_the_same_cache_dir() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    fs::write(temp.path().join("config.json"), r#"{ "extends": "gh:org/theme" }"#).unwrap();
    let fetcher = Arc::new(FixtureFetcher::default());

    let first = load_config(options(temp.path(), &cache, fetcher.clone()))
        .await
        .unwrap();
    let second = load_config(options(temp.path(), &cache, fetcher.clone()))
        .await
        .unwrap();

    assert_eq!(first.layers[1].cwd, second.layers[1].cwd);
    assert_eq!(first.config, second.config);
    let requests = fetcher.requests.lock().unwrap();
    assert_eq!(requests[0].dir, requests[1].dir);
}

#[tokio::test]
async fn test_per_source_fetch_options() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    fs::write(
        temp.path().join("config.json"),
        r#"{ "extends": [["gh:org/private", { "auth": "secret", "install": true, "giget": { "provider": "gitlab" } }]] }"#,
    )
    .unwrap();
    let fetcher = Arc::new(FixtureFetcher::default());

    load_config(options(temp.path(), &cache, fetcher.clone()))
        .await
        .unwrap();

    let requests = fetcher.requests.lock().unwrap();
    let fetch = &requests[0].options;
    assert_eq!(fetch.auth.as_deref(), Some("secret"));
    assert_eq!(fetch.force, Some(true));
    assert_eq!(fetch.provider.as_deref(), Some("gitlab"));
}

#[tokio::test]
async fn test_fetch_failure_names_source_and_cwd() {
    let temp = TempDir::new().unwrap();
    let cache = temp.path().join("cache");
    fs::write(temp.path().join("config.json"), r#"{ "extends": "gh:org/gone" }"#).unwrap();

    let err = load_config(options(temp.path(), &cache, Arc::new(OfflineFetcher)))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::Remote { ref source_ref, .. } if source_ref == "gh:org/gone"));
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_remote_disabled_treats_source_as_path() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("config.json"), r#"{ "extends": "gh:org/theme", "a": 1 }"#).unwrap();

    let resolved = load_config(
        LoadConfigOptions::default()
            .with_cwd(temp.path())
            .with_environment(Environment::default())
            .with_remote(RemoteOptions::disabled().with_fetcher(Arc::new(OfflineFetcher))),
    )
    .await
    .unwrap();
    assert_eq!(resolved.config, json!({ "a": 1 }));
}
