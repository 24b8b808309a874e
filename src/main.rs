//! progress-sync - operator CLI for the progress sync engine

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};

use progress_sync::{
    config::{Args, Command},
    logging, FileSessionCache, HttpRecordStore, ProgressMerger, ProgressSync, ScoreNormalizer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match &args.command {
        Command::Merge { remote, local } => merge_files(remote, local),
        Command::Register { address } => {
            let engine = build_engine(&args)?;
            let record = engine.registration().auto_register(address).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Lookup { address } => {
            let engine = build_engine(&args)?;
            match engine.registration().lookup(address).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("{} is not registered", address),
            }
            Ok(())
        }
        Command::Watch { address } => watch(&args, address).await,
    }
}

fn build_engine(args: &Args) -> anyhow::Result<ProgressSync> {
    let store = Arc::new(HttpRecordStore::new(args.store_config()));
    let session = FileSessionCache::open(&args.session_dir)
        .with_context(|| format!("opening session dir {}", args.session_dir.display()))?;
    Ok(ProgressSync::new(args.sync_config(), store, Arc::new(session)))
}

fn merge_files(remote: &Path, local: &Path) -> anyhow::Result<()> {
    let normalizer = ScoreNormalizer::new();
    let remote = normalizer.normalize_points(&read_json(remote)?);
    let local = normalizer.normalize_points(&read_json(local)?);

    let merged = ProgressMerger::new().merge(Some(&remote), Some(&local));
    println!("{}", serde_json::to_string_pretty(&merged)?);
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn watch(args: &Args, address: &str) -> anyhow::Result<()> {
    let engine = build_engine(args)?;
    let config = engine.config();

    info!("======================================");
    info!("  progress-sync watch");
    info!("======================================");
    info!("Store: {}", args.store_url);
    info!("Session dir: {}", args.session_dir.display());
    info!("Autosave every {:?}, drain every {:?}", config.autosave_interval, config.retry.drain_interval);
    info!(
        "Retry queue: {} entries, {:?} horizon",
        config.retry.capacity, config.retry.staleness_horizon
    );
    info!("======================================");

    let ctx = engine.connect(address).await?;
    info!(address = %ctx.address(), state = ?ctx.state(), "Watching wallet, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");

    match engine.sync_now(address).await {
        Ok(outcome) => info!(?outcome, "Final sync"),
        Err(e) => warn!(error = %e, "Final sync failed"),
    }
    let queued = ctx.queued().await;
    if queued > 0 {
        warn!(queued, "Exiting with unsent saves");
    }
    engine.disconnect(address).await?;
    Ok(())
}
