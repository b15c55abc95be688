//! Vitals Monitor CLI
//!
//! Command-line interface for the patient vital-signs dashboard client.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use vitals_monitor::{load_config, Config};

#[derive(Parser)]
#[command(name = "vitals-monitor")]
#[command(about = "Patient vital-signs dashboard client")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend REST base URL (overrides config file)
    #[arg(long, env = "VITALS_API_URL")]
    api_url: Option<String>,

    /// Backend stream URL (overrides config file)
    #[arg(long, env = "VITALS_WS_URL")]
    ws_url: Option<String>,

    /// Dashboard port (overrides config file)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    // wss:// streams need a process-wide rustls provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::debug!(
        "Parsed command line arguments: config={:?}, api_url={:?}, ws_url={:?}, dashboard_port={:?}, log_level={:?}",
        args.config,
        args.api_url,
        args.ws_url,
        args.dashboard_port,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(api_url) = args.api_url {
        config.backend.api_url = api_url;
    }
    if let Some(ws_url) = args.ws_url {
        config.backend.ws_url = ws_url;
    }
    if let Some(dashboard_port) = args.dashboard_port {
        config.dashboard.port = dashboard_port;
    }

    tracing::info!("Starting vitals monitor");
    tracing::debug!(
        "Backend: {} (stream {}), polling every {}s",
        config.backend.api_url,
        config.backend.ws_url,
        config.polling.interval_seconds
    );

    vitals_monitor::run(config).await?;

    Ok(())
}
