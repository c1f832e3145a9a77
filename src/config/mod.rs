//! Layered configuration system.
//!
//! Merges configuration from several sources, highest precedence first:
//! 1. **Overrides** - programmatic value or provider
//! 2. **Main** - `<name>.config.*` in `cwd` (or `.config/`)
//! 3. **RC** - `.<name>rc` in `cwd`, optionally workspace root and home
//! 4. **package.json** - selected fields of the nearest manifest
//! 5. **Default config** - programmatic value or provider
//! 6. **Extended** - layers named by `extends`, depth-first
//! 7. **Defaults** - static fallback values
//!
//! ## Merge Strategy
//! - Objects merge key by key, higher layer wins
//! - Arrays concatenate, higher layer first
//! - `null` never shadows a lower value
//!
//! ## Environment
//! - `NODE_ENV` - selects the `$<env>` overlay (unless set explicitly)
//! - `CONFSTACK_CACHE_DIR` - cache root for remote layers

pub mod diff;
pub mod dotenv;
pub mod env_overlay;
pub mod extends;
pub mod fetch;
pub mod formats;
mod loader;
pub mod locate;
pub mod manifest;
mod merge;
pub mod rc;
pub mod remote;
mod resolver;
mod types;
pub mod validate;
pub mod watcher;

pub use diff::{ChangeKind, ConfigDiff, DiffEntry};
pub use dotenv::{DotenvOptions, Environment, load_dotenv, setup_dotenv};
pub use env_overlay::apply_env;
pub use extends::{ExtensionEntry, expand_extensions};
pub use fetch::{FetchOptions, FetchRequest, RemoteFetcher, TarballFetcher};
pub use formats::{ConfigFn, LiteralModuleLoader, ModuleExport, ModuleLoader};
pub use loader::{ENV_NAME_VAR, load_config};
pub use locate::SUPPORTED_EXTENSIONS;
pub use merge::{Merger, merge, merge_all};
pub use remote::RemoteOptions;
pub use resolver::resolve_layer;
pub use types::*;
pub use validate::{ConfigValidator, SchemaValidator, validate_config};
pub use watcher::{
    ConfigWatcher, UpdateContext, WatchConfigOptions, WatchEvent, WatchEventKind, WatchHooks,
    watch_config,
};
