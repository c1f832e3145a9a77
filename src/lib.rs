//! Layered configuration loading.
//!
//! Merges a main config file, RC files, `package.json` fields, programmatic
//! defaults and overrides, plus any number of layers reached through `extends`
//! (local paths, packages or remote templates), with `$<env>` overlays applied
//! per layer. See [`config::load_config`] and [`config::watch_config`].

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
