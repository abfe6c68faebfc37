mod auth;
mod config;
mod db;
mod errors;
mod ingest;
mod metrics;
mod model;
mod purge;
mod query;
mod rest;
mod store;
mod validate;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::ApiKey;
use crate::config::Config;
use crate::db::PgReadingStore;
use crate::rest::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    info!("Starting thermo ingestor");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.redacted_database_url());
    info!("Max bulk batch size: {}", config.max_batch_size);

    // Initialize metrics
    metrics::init_metrics().context("failed to register metrics")?;

    // One pool for the whole process, shared by every request handler.
    let pool = db::make_pool(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to database")?;

    let store = Arc::new(PgReadingStore::new(pool.clone()));
    let state = AppState::new(store, config.max_batch_size);
    let app = rest::create_router(state, ApiKey::new(config.api_key.as_str()));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down");
    pool.close().await;
    info!("Database connection closed");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
