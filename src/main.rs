//! F1 History CLI
//!
//! One-shot queries over the cached multi-season history.

mod cli;

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use f1_history::source::FixtureSource;
use f1_history::{AppConfig, HistoricalDataManager};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "f1_history=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref())?;
    tracing::info!("Configuration loaded");
    tracing::info!("Fixtures: {}", config.source.fixtures_dir.display());

    let source = Arc::new(FixtureSource::new(&config.source.fixtures_dir));
    let mut manager = HistoricalDataManager::open(&config, source)?;

    // Ctrl-C stops the running scan; gathered data is still persisted.
    let cancel = manager.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current event");
            cancel.cancel();
        }
    });

    let format = cli.format;
    let command: Commands = cli.command;
    tokio::task::spawn_blocking(move || cli::run(&mut manager, command, format)).await?
}
