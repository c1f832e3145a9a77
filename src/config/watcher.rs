//! Live reloading of a resolved configuration.
//!
//! Watches every file that could contribute a layer:
//! - the main config file under each supported extension, also under `.config/`
//! - the concrete file of each loaded layer
//! - the RC file and `package.json` next to each layer, when enabled
//!
//! Filesystem events are debounced, then the whole configuration is reloaded.
//! A failed reload keeps the previous configuration.

use super::diff::{ConfigDiff, diff};
use super::loader::load_config;
use super::locate::candidate_paths;
use super::manifest::PACKAGE_JSON;
use super::types::{LoadConfigOptions, PackageJsonFields, ResolvedConfig};
use crate::error::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use notify::RecommendedWatcher;
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, mpsc};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Updated,
    Removed,
}

impl std::fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEventKind::Created => write!(f, "created"),
            WatchEventKind::Updated => write!(f, "updated"),
            WatchEventKind::Removed => write!(f, "removed"),
        }
    }
}

/// A change to one watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

/// Old and new configuration around a reload.
pub struct UpdateContext {
    pub old_config: Arc<ResolvedConfig>,
    pub new_config: Arc<ResolvedConfig>,
    diff: OnceLock<ConfigDiff>,
}

impl UpdateContext {
    pub fn new(old_config: Arc<ResolvedConfig>, new_config: Arc<ResolvedConfig>) -> Self {
        Self {
            old_config,
            new_config,
            diff: OnceLock::new(),
        }
    }

    /// Changes between the two merged configs, computed on first access.
    pub fn diff(&self) -> &ConfigDiff {
        self.diff
            .get_or_init(|| diff(&self.old_config.config, &self.new_config.config))
    }
}

/// Callbacks invoked by a [`ConfigWatcher`].
#[async_trait]
pub trait WatchHooks: Send + Sync {
    /// A watched file changed. Runs before the reload.
    async fn on_watch(&self, _event: &WatchEvent) {}

    /// Return `true` to handle the update here and skip `on_update`.
    async fn accept_hmr(&self, _ctx: &UpdateContext) -> bool {
        false
    }

    /// The configuration was reloaded.
    async fn on_update(&self, _ctx: &UpdateContext) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl WatchHooks for NoopHooks {}

pub struct WatchConfigOptions {
    pub load: LoadConfigOptions,
    /// Quiet period before a burst of changes triggers a reload.
    pub debounce: Duration,
    pub hooks: Arc<dyn WatchHooks>,
}

impl WatchConfigOptions {
    pub fn new(load: LoadConfigOptions) -> Self {
        Self {
            load,
            debounce: DEFAULT_DEBOUNCE,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn WatchHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// A configuration kept current by a file watcher.
///
/// Dropping the watcher, or calling [`unwatch`](Self::unwatch), stops watching.
pub struct ConfigWatcher {
    current: Arc<ArcSwap<ResolvedConfig>>,
    watching_files: Vec<PathBuf>,
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher>>>,
    reload_task: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    /// The latest successfully loaded configuration.
    pub fn config(&self) -> Arc<ResolvedConfig> {
        self.current.load_full()
    }

    pub fn watching_files(&self) -> &[PathBuf] {
        &self.watching_files
    }

    /// Stop watching. Later file changes are ignored.
    pub fn unwatch(&self) {
        if let Ok(mut debouncer) = self.debouncer.lock() {
            debouncer.take();
        }
        self.reload_task.abort();
        info!("Stopped watching {} files", self.watching_files.len());
    }
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("watching_files", &self.watching_files)
            .finish_non_exhaustive()
    }
}

/// Load the configuration and keep it current as its files change.
pub async fn watch_config(options: WatchConfigOptions) -> Result<ConfigWatcher> {
    let initial = load_config(options.load.clone()).await?;
    let watching_files = watched_files(&initial, &options.load);
    let current = Arc::new(ArcSwap::from_pointee(initial));

    let (notify_tx, notify_rx) = mpsc::channel();
    let mut debouncer = new_debouncer(options.debounce.max(MIN_DEBOUNCE), notify_tx)?;
    let watcher = debouncer.watcher();
    for dir in watch_dirs(&watching_files) {
        debug!("Watching directory: {}", dir.display());
        watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;
    }
    info!("Watching {} config files", watching_files.len());

    let (batch_tx, batch_rx) = tokio_mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || forward_events(notify_rx, batch_tx));

    let state = ReloadState {
        load: options.load,
        hooks: options.hooks,
        current: current.clone(),
        files: WatchedSet::new(&watching_files),
    };
    let reload_task = tokio::spawn(state.run(batch_rx));

    Ok(ConfigWatcher {
        current,
        watching_files,
        debouncer: Mutex::new(Some(debouncer)),
        reload_task,
    })
}

/// Every path whose change may alter `resolved`, without duplicates.
pub fn watched_files(resolved: &ResolvedConfig, options: &LoadConfigOptions) -> Vec<PathBuf> {
    let config_file_name = options.config_file_name();
    let rc_file_name = options.rc_file_name();

    let mut dirs: Vec<&Path> = vec![resolved.cwd.as_path()];
    dirs.extend(resolved.layers.iter().filter_map(|l| l.cwd.as_deref()));

    let mut files = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |path: PathBuf| {
        if seen.insert(path.clone()) {
            files.push(path);
        }
    };

    for dir in dirs {
        for path in candidate_paths(dir, &config_file_name) {
            add(path);
        }
        if let Some(rc) = &rc_file_name {
            add(dir.join(rc));
        }
        if options.package_json != PackageJsonFields::Disabled {
            add(dir.join(PACKAGE_JSON));
        }
    }
    for layer in &resolved.layers {
        if let Some(file) = &layer.config_file {
            add(file.clone());
        }
    }
    files
}

/// Existing parent directories of `files`.
fn watch_dirs(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = files
        .iter()
        .filter_map(|f| f.parent())
        .filter(|d| d.is_dir())
        .map(Path::to_path_buf)
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Forward debounced paths from the notify thread to the reload task.
fn forward_events(
    rx: mpsc::Receiver<std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>>,
    tx: tokio_mpsc::UnboundedSender<Vec<PathBuf>>,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let paths: Vec<PathBuf> = events
                    .into_iter()
                    .filter(|e| {
                        matches!(
                            e.kind,
                            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                        )
                    })
                    .map(|e| e.path)
                    .collect();
                if !paths.is_empty() && tx.send(paths).is_err() {
                    info!("Config reload task stopped, closing watcher");
                    return;
                }
            }
            Ok(Err(e)) => error!("File watcher error: {}", e),
            Err(_) => {
                debug!("Config watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Watched files plus which of them currently exist.
struct WatchedSet {
    files: HashSet<PathBuf>,
    /// Canonical parent + file name back to the declared path.
    canonical: HashMap<PathBuf, PathBuf>,
    existing: HashSet<PathBuf>,
}

fn canonical_key(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

impl WatchedSet {
    fn new(files: &[PathBuf]) -> Self {
        Self {
            files: files.iter().cloned().collect(),
            canonical: files
                .iter()
                .filter_map(|f| canonical_key(f).map(|k| (k, f.clone())))
                .collect(),
            existing: files.iter().filter(|f| f.exists()).cloned().collect(),
        }
    }

    fn lookup(&self, path: &Path) -> Option<PathBuf> {
        if self.files.contains(path) {
            return Some(path.to_path_buf());
        }
        canonical_key(path).and_then(|k| self.canonical.get(&k).cloned())
    }

    /// Turn raw event paths into typed events for watched files.
    fn classify(&mut self, paths: Vec<PathBuf>) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        for raw in paths {
            let Some(path) = self.lookup(&raw) else {
                continue;
            };
            let kind = match (path.exists(), self.existing.contains(&path)) {
                (true, true) => WatchEventKind::Updated,
                (true, false) => {
                    self.existing.insert(path.clone());
                    WatchEventKind::Created
                }
                (false, true) => {
                    self.existing.remove(&path);
                    WatchEventKind::Removed
                }
                (false, false) => continue,
            };
            if !events.iter().any(|e: &WatchEvent| e.path == path) {
                events.push(WatchEvent { kind, path });
            }
        }
        events
    }
}

struct ReloadState {
    load: LoadConfigOptions,
    hooks: Arc<dyn WatchHooks>,
    current: Arc<ArcSwap<ResolvedConfig>>,
    files: WatchedSet,
}

impl ReloadState {
    async fn run(mut self, mut rx: tokio_mpsc::UnboundedReceiver<Vec<PathBuf>>) {
        while let Some(paths) = rx.recv().await {
            let events = self.files.classify(paths);
            if events.is_empty() {
                continue;
            }
            for event in &events {
                debug!("Config file {}: {}", event.kind, event.path.display());
                self.hooks.on_watch(event).await;
            }
            self.reload(&events).await;
        }
    }

    async fn reload(&self, events: &[WatchEvent]) {
        let new_config = match load_config(self.load.clone()).await {
            Ok(config) => Arc::new(config),
            Err(e) => {
                let path = events.first().map(|e| e.path.display().to_string()).unwrap_or_default();
                warn!("Failed to reload config after change to {}: {}", path, e);
                return;
            }
        };
        let old_config = self.current.swap(new_config.clone());
        let ctx = UpdateContext::new(old_config, new_config);
        if self.hooks.accept_hmr(&ctx).await {
            debug!("Config update accepted by hot reload hook");
            return;
        }
        self.hooks.on_update(&ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{LayerKind, ResolvedLayer};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_watched_files_cover_layers() {
        let resolved = ResolvedConfig {
            config: json!({}),
            cwd: PathBuf::from("/p"),
            config_file: PathBuf::from("/p/config.json"),
            layers: vec![ResolvedLayer {
                kind: LayerKind::Extended,
                config: Some(json!({"a": 1})),
                config_file: Some(PathBuf::from("/p/theme/custom.yaml")),
                cwd: Some(PathBuf::from("/p/theme")),
                ..Default::default()
            }],
        };
        let options = LoadConfigOptions::default().with_package_json(PackageJsonFields::Name);
        let files = watched_files(&resolved, &options);

        assert!(files.contains(&PathBuf::from("/p/config.ts")));
        assert!(files.contains(&PathBuf::from("/p/.config/config.toml")));
        assert!(files.contains(&PathBuf::from("/p/.configrc")));
        assert!(files.contains(&PathBuf::from("/p/package.json")));
        assert!(files.contains(&PathBuf::from("/p/theme/config.json")));
        assert!(files.contains(&PathBuf::from("/p/theme/custom.yaml")));

        let unique: HashSet<_> = files.iter().collect();
        assert_eq!(unique.len(), files.len());
    }

    #[test]
    fn test_classify_tracks_existence() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("config.json");
        let mut set = WatchedSet::new(std::slice::from_ref(&file));

        fs::write(&file, "{}").unwrap();
        let events = set.classify(vec![file.clone()]);
        assert_eq!(events[0].kind, WatchEventKind::Created);

        let events = set.classify(vec![file.clone(), file.clone()]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Updated);

        fs::remove_file(&file).unwrap();
        let events = set.classify(vec![file.clone()]);
        assert_eq!(events[0].kind, WatchEventKind::Removed);

        assert!(set.classify(vec![temp.path().join("other.json")]).is_empty());
    }

    #[test]
    fn test_update_context_diff_is_lazy_and_cached() {
        let old = Arc::new(ResolvedConfig {
            config: json!({"a": 1}),
            ..Default::default()
        });
        let new = Arc::new(ResolvedConfig {
            config: json!({"a": 2}),
            ..Default::default()
        });
        let ctx = UpdateContext::new(old, new);
        assert!(ctx.diff.get().is_none());
        assert_eq!(ctx.diff().len(), 1);
        assert!(std::ptr::eq(ctx.diff(), ctx.diff()));
    }
}
