//! psq-gateway CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use psq_gateway::GatewayBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();
    let json_logs = cli.json_logs;

    // Build configuration
    let config = cli.into_config()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (plain, json) = if json_logs {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    info!("psq-gateway v{}", env!("CARGO_PKG_VERSION"));

    // Build and run the gateway
    let gateway = GatewayBuilder::new(config).build()?;
    gateway.run().await?;

    info!("Goodbye!");
    Ok(())
}
