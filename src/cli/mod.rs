//! CLI definitions for the `confstack` inspection binary.
//!
//! The binary loads a configuration the same way a library caller would and
//! prints the merged result as JSON.

use crate::config::{DotenvOptions, LoadConfigOptions, PackageJsonFields};
use clap::Parser;
use std::path::PathBuf;

/// Load layered configuration and print the merged result
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Working directory to resolve from (default: current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Logical config name; selects `<name>.config.*` and `.<name>rc`
    #[arg(short, long, default_value = "config")]
    pub name: String,

    /// Explicit main config file stem (overrides the name-derived one)
    #[arg(short, long)]
    pub config_file: Option<String>,

    /// Environment overlay to apply (default: $NODE_ENV)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Do not apply `$<env>` overlays
    #[arg(long, conflicts_with = "env")]
    pub no_env: bool,

    /// RC file name (default: `.<name>rc`)
    #[arg(long)]
    pub rc: Option<String>,

    /// Skip RC files entirely
    #[arg(long, conflicts_with_all = ["rc", "global_rc"])]
    pub no_rc: bool,

    /// Also merge RC files from the workspace root and home directory
    #[arg(long)]
    pub global_rc: bool,

    /// Load `.env` files from the working directory first
    #[arg(long)]
    pub dotenv: bool,

    /// Read the `<name>` field of the nearest package.json
    #[arg(long)]
    pub package_json: bool,

    /// Drop top-level `$`-prefixed keys from the merged config
    #[arg(long)]
    pub omit_dollar_keys: bool,

    /// Fail when no main config file exists
    #[arg(long)]
    pub required: bool,

    /// Print the layer list after the merged config
    #[arg(long)]
    pub layers: bool,

    /// Keep running and print a diff whenever a config file changes
    #[arg(short, long)]
    pub watch: bool,

    /// Debounce window for --watch, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub debounce_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2")]
    pub log: String,
}

impl Cli {
    /// Translate the flags into loader options.
    pub fn load_options(&self) -> LoadConfigOptions {
        let mut options = LoadConfigOptions::new(&self.name)
            .omit_dollar_keys(self.omit_dollar_keys)
            .require_config_file(self.required)
            .with_global_rc(self.global_rc);
        if let Some(cwd) = &self.cwd {
            options = options.with_cwd(cwd);
        }
        if let Some(config_file) = &self.config_file {
            options = options.with_config_file(config_file);
        }
        if let Some(env) = &self.env {
            options = options.with_env_name(env);
        } else if self.no_env {
            options = options.without_env_overlay();
        }
        if let Some(rc) = &self.rc {
            options = options.with_rc_file(rc);
        }
        if self.no_rc {
            options = options.without_rc();
        }
        if self.dotenv {
            options = options.with_dotenv(DotenvOptions::default());
        }
        if self.package_json {
            options = options.with_package_json(PackageJsonFields::Name);
        }
        options
    }
}
