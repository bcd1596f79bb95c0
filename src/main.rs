//! Duelgate service binary
//!
//! Loads configuration, starts the background workers and serves the API
//! until Ctrl+C or SIGTERM.

use clap::Parser;
use duelgate::{api::ApiServer, App, ConfigLoader, DuelgateConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "duelgate")]
#[command(about = "Wager duel orchestration service", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override api.host
    #[arg(long)]
    host: Option<String>,

    /// Override api.port
    #[arg(long)]
    port: Option<u16>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", ConfigLoader::render(&DuelgateConfig::default())?);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    init_tracing(&config.logging.filter);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?config.storage.backend,
        auto_payout = config.settlement.auto_payout,
        "Starting duelgate"
    );

    let app = Arc::new(App::build(config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = app.spawn_background(shutdown_rx).await;

    let served = ApiServer::new(app.clone()).run().await;
    if let Err(e) = &served {
        error!(error = %e, "API server failed");
    }

    info!("Stopping background workers");
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
            warn!("Background worker did not stop in time");
        }
    }

    served?;
    Ok(())
}
