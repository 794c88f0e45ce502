//! Dispatch Worker - sends campaign email from the shared database.
//!
//! Runs the dispatch loop until SIGINT/SIGTERM, and the keepalive pinger
//! alongside it when `KEEPALIVE_URL` is set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::signal;
use tracing::info;

use dispatch::{
    db, keepalive, telemetry, Backends, Clock, Config, DirectBackend, Dispatcher, LettreConnector,
    RelayBackend, SystemClock,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    telemetry::init(config.log_file.as_deref())?;
    info!("worker_starting");
    info!(
        database_url = %config.database_url,
        relay_configured = config.relay_api_url.is_some(),
        keepalive_configured = config.keepalive_url.is_some(),
        smtp_timeout_secs = config.smtp_timeout_secs,
        pass_delay_secs = ?config.pass_delay_secs,
        post_send_pause_secs = config.post_send_pause_secs,
        "config_loaded"
    );

    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to open database")?;

    let client = Client::builder()
        .build()
        .context("Failed to create HTTP client")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = Backends::new(
        Arc::new(RelayBackend::new(client.clone(), config.relay_api_url.clone())),
        Arc::new(DirectBackend::new(
            LettreConnector,
            clock.clone(),
            Duration::from_secs(config.smtp_timeout_secs),
        )),
    );

    let pinger = keepalive::spawn(
        client,
        config.keepalive_url.clone(),
        keepalive::INITIAL_DELAY,
        Duration::from_secs(config.keepalive_interval_secs),
    );

    let dispatcher = Dispatcher::new(pool.clone(), clock, backends, &config);
    info!("worker_ready");
    dispatcher.run(shutdown_signal()).await;

    if let Some(handle) = pinger {
        handle.abort();
    }
    pool.close().await;

    info!("worker_shutdown_complete");
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
