use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use monitor::config::Config;
use monitor::device::DeviceClient;
use monitor::metrics;
use monitor::poll::{self, FetchState};
use monitor::rest::{self, AppState};
use monitor::temperature::TemperatureService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("Starting soil monitor");
    info!("Temperature API: {}", config.temperature_api_url);
    info!(
        "Device API: {} (client {})",
        config.tuya_base_url, config.tuya_client_id
    );
    info!("Polling interval: {:?}", config.polling_interval());
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics().context("failed to register metrics")?;

    let temperature = Arc::new(TemperatureService::new(config.temperature_api())?);
    let devices = Arc::new(DeviceClient::new(config.device_api())?);

    // Temperature poller feeding the dashboard's latest-reading card
    let (tx, rx) = watch::channel(FetchState::Loading);
    let poll_service = temperature.clone();
    let poller_handle = tokio::spawn(poll::run_poller(
        "temperature",
        config.polling_interval(),
        move || {
            let service = poll_service.clone();
            async move { service.fetch_latest().await }
        },
        tx,
    ));

    let state = AppState {
        temperature,
        devices,
        latest: rx,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    poller_handle.abort();
    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
