mod cli;
mod config;
mod error;
mod model;
mod providers;
mod sources;
mod sync;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cli::Args;
use sync::engine::ReconciliationEngine;
use sync::runner::SyncLoop;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_logging(&args)?;

    // Load config
    let config = config::load_config(args.config.as_deref())?;
    config
        .tracker
        .validate()
        .context("Invalid tracker configuration")?;
    if config.poll_interval_secs == 0 {
        bail!("poll_interval_secs must be greater than zero");
    }
    if config.tracker.field_map.is_empty() {
        warn!("tracker.field_map is empty; work items will only carry their parent link");
    }

    let source = sources::create_source(&config.source)?;
    let provider = providers::create_provider(&config.tracker);
    let engine = ReconciliationEngine::new(provider, config.tracker.field_map.clone())
        .dry_run(args.what_if);
    let interval = Duration::from_secs(config.poll_interval_secs);
    let mut sync_loop = SyncLoop::new(source, engine, config.tracker, interval);

    if args.once {
        sync_loop.run_pass().await?;
        return Ok(());
    }

    info!(interval_secs = interval.as_secs(), what_if = args.what_if, "starting sync loop");
    tokio::select! {
        _ = sync_loop.run_forever() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("shutting down");
        }
    }

    Ok(())
}
