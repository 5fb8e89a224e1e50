//! Main entry point for mint-sentry

use anyhow::Result;
use mint_sentry::{App, AppConfig};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting mint-sentry");

    let config = AppConfig::load()?;
    info!(
        "Config: {} workers, {} stages, simulated trading: {}",
        config.scheduler.workers,
        config.scheduler.stages.len(),
        config.trading.simulated
    );

    let app = App::from_config(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive so the loops keep running
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    app.run(shutdown_rx).await?;
    info!("mint-sentry stopped");
    Ok(())
}
