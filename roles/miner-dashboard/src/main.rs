use std::sync::Arc;
use tracing::{error, info};

use miner_dashboard::{api, config::Config, DashboardState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_args()?;

    // Setup tracing with optional file output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt().with_env_filter(env_filter);

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| format!("Failed to open log file {}: {}", log_file, e))?;
        fmt_layer.with_writer(Arc::new(file)).init();
    } else {
        fmt_layer.init();
    }

    info!("Starting miner dashboard");
    info!("HTTP server: {}", config.http_address);
    info!("History database: {}", config.db_path.display());
    info!(
        "Miner readings cached for {}s, request timeout {}s",
        config.cache_ttl_secs, config.request_timeout_secs
    );

    let state = Arc::new(DashboardState::from_config(&config).await?);
    info!("History storage initialized");

    match state.sweep_expired(config.retention_days).await {
        Ok(deleted) => info!(
            "Removed {} readings older than {} days",
            deleted, config.retention_days
        ),
        Err(e) => error!("Failed to clean up old readings: {}", e),
    }

    api::run_http_server(config.http_address.clone(), state).await
}
