//! Managed-exit position monitor - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Managed-exit position monitor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TRANCHE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made.
    tranche_ws::init_crypto();

    let args = Args::parse();

    tranche_telemetry::init_logging()?;

    info!("Starting tranche-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TRANCHE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TRANCHE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = tranche_bot::AppConfig::from_file(&config_path)?;
    info!(
        bind = %config.server.bind,
        store = ?config.store.backend,
        stream = %config.stream.base_url,
        "Configuration loaded"
    );

    let app = tranche_bot::Application::new(config).await?;
    app.run().await?;

    Ok(())
}
