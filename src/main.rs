//! Tollgate binary entry point.

use clap::Parser;
use std::path::PathBuf;
use tollgate::app::App;
use tollgate::config::{ConfigLoader, GatewayConfig, LogFormat};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Rate-limiting reverse-proxy API gateway.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tollgate={}", config.logging.level)));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = ConfigLoader::new();
    let config = match args.config {
        Some(path) => loader.load(path)?,
        None => loader.load_or_default("tollgate.toml")?,
    };

    init_tracing(&config);
    info!(name = %config.gateway.name, "starting tollgate v{}", env!("CARGO_PKG_VERSION"));

    let mut app = App::bootstrap(&config);
    app.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    app.shutdown().await;

    Ok(())
}
