//! Position trigger and settlement service - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Position trigger and settlement service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "ORDERTRACK_CONFIG", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any wss:// connection
    ordertrack_ws::init_crypto();

    let args = Args::parse();

    ordertrack_telemetry::init_logging()?;

    info!("Starting ordertrack v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let config = ordertrack_service::AppConfig::load(&args.config)?;
    info!(feed_url = %config.feed.url, "Configuration loaded");

    let app = ordertrack_service::Application::new(config)?;
    app.run().await?;

    Ok(())
}
