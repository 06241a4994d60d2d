// src/main.rs
//! Traffic Gateway
//!
//! Transparent TCP proxy that relays redirected connections to their
//! original destination and records traffic per connection and per device.

use anyhow::{Context, Result};
use traffic_gateway::observability::{init_metrics, init_tracing};
use traffic_gateway::{AccountingSink, GatewayConfig, TrafficStore, TransparentListener};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = GatewayConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(config.log_format)?;
    init_metrics(config.metrics_addr)?;

    info!("Starting Traffic Gateway v{}", traffic_gateway::VERSION);
    info!("Configuration loaded: {:?}", config);

    let store = TrafficStore::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open traffic store at {:?}", config.db_path))?;
    let sink = AccountingSink::new(store);

    // Bind/listen failure is fatal
    let listener = TransparentListener::bind(&config, sink)
        .with_context(|| format!("Failed to start listener on {}", config.listen_addr()))?;

    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    listener.run_until(shutdown_signal).await;
    info!("Transparent proxy stopped");
    Ok(())
}
