//! # Parley Server
//!
//! Realtime chat messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with custom config
//! parley -c /path/to/parley.toml
//!
//! # Run with environment variables
//! PARLEY__PORT=8080 PARLEY__HOST=0.0.0.0 parley
//! ```

mod config;
mod handlers;
mod identity;
mod metrics;
mod request;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parley chat messaging server.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Parley chat messaging server")]
struct Cli {
    /// Path to a TOML config file. Without it the default locations are
    /// searched.
    #[arg(short = 'c', long = "config")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_server=debug,parley_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.config.as_deref() {
        Some(path) => config::Config::load_from(Some(path))?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
