mod config;
mod data;
mod monitoring;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Cli, Config, EnvConfig};
use data::forecast_api::ForecastClient;
use data::poller::Poller;
use monitoring::metrics::Metrics;
use monitoring::store::ForecastStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        "Starting forecast_solar_exporter {}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let env_config = EnvConfig::load()?;
    let config = Config::resolve(&cli, &env_config)?;
    let listen_addr = config.listen_addr()?;

    tracing::info!(
        "Location: lat={} lon={} declination={} azimuth={} kWp={}",
        config.location.latitude,
        config.location.longitude,
        config.location.declination,
        config.location.azimuth,
        config.location.peak_power_kw
    );
    tracing::info!("Poll interval: {}s", config.polling.interval_secs);

    let store = Arc::new(ForecastStore::new());
    let metrics = Arc::new(
        Metrics::new(Arc::clone(&store)).context("Failed to register metrics")?,
    );

    let client = ForecastClient::new(&config)?;
    let poller = Poller::new(
        client,
        Arc::clone(&store),
        metrics.poll_metrics(),
        config.polling.interval(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let poll_handle = tokio::spawn(poller.run(shutdown_rx.clone()));

    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let router = monitoring::server::build_router(metrics);
    monitoring::server::serve(listen_addr, router, shutdown_rx).await?;

    poll_handle.await.context("Forecast poller panicked")?;

    Ok(())
}

/// Fire `shutdown_tx` once `signal` resolves. If the signal handler cannot be
/// installed the sender is held forever, so the exporter keeps running
/// instead of every receiver seeing a closed channel.
async fn forward_shutdown<F>(signal: F, shutdown_tx: watch::Sender<()>)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
    shutdown_tx.send(()).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_fires_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        tokio::spawn(forward_shutdown(async { Ok::<(), std::io::Error>(()) }, shutdown_tx));

        tokio::time::timeout(Duration::from_secs(5), shutdown_rx.changed())
            .await
            .expect("shutdown not signalled")
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_failure_keeps_running() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let signal = async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        let handle = tokio::spawn(forward_shutdown(signal, shutdown_tx));

        let waited = tokio::time::timeout(Duration::from_millis(200), shutdown_rx.changed()).await;
        assert!(waited.is_err(), "channel fired or closed after signal failure");

        handle.abort();
    }
}
