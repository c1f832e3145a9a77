//! confstack
//!
//! Loads layered configuration for a directory and prints the merged result.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use confstack::cli::Cli;
use confstack::config::{
    ResolvedConfig, UpdateContext, WatchConfigOptions, WatchEvent, WatchHooks, load_config,
    watch_config,
};
use confstack::logging::{self, LogTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Prints each reload as a diff against the previous config.
struct PrintHooks {
    layers: bool,
}

#[async_trait]
impl WatchHooks for PrintHooks {
    async fn on_watch(&self, event: &WatchEvent) {
        info!("{} {}", event.kind, event.path.display());
    }

    async fn on_update(&self, ctx: &UpdateContext) {
        print!("{}", ctx.diff());
        if self.layers
            && let Err(e) = print_layers(&ctx.new_config)
        {
            tracing::error!("Failed to print layers: {}", e);
        }
    }
}

fn print_layers(resolved: &ResolvedConfig) -> Result<()> {
    for layer in &resolved.layers {
        let origin = layer
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| layer.source.clone())
            .unwrap_or_else(|| "-".to_string());
        println!("# {} {}", layer.kind, origin);
        println!("{}", serde_json::to_string_pretty(&layer.config)?);
    }
    Ok(())
}

fn print_resolved(resolved: &ResolvedConfig, layers: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&resolved.config)?);
    if layers {
        print_layers(resolved)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let options = cli.load_options();
    if !cli.watch {
        let resolved = load_config(options).await?;
        return print_resolved(&resolved, cli.layers);
    }

    let watcher = watch_config(
        WatchConfigOptions::new(options)
            .with_debounce(Duration::from_millis(cli.debounce_ms))
            .with_hooks(Arc::new(PrintHooks { layers: cli.layers })),
    )
    .await?;
    print_resolved(&watcher.config(), cli.layers)?;
    for file in watcher.watching_files() {
        tracing::debug!("Watching {}", file.display());
    }

    tokio::signal::ctrl_c().await?;
    watcher.unwatch();
    Ok(())
}
