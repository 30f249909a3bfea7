//! tablevault daemon entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting tablevault");

    let once = cli.once;
    let config = config::Config::load(cli)?;
    tracing::info!(
        paths = config.paths.len(),
        threads = config.threads,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, once))?;

    tracing::info!("tablevault shut down cleanly");
    Ok(())
}
