use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db::Store;
use crate::server::create_router;
use crate::types::AppState;

mod config;
mod conflict;
mod db;
mod enrollment;
mod error;
mod export;
mod locks;
mod model;
mod reservation;
mod schedule;
mod semester;
mod server;
mod timetable;
mod types;
mod util;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    info!(
        db_path = %config.db_path,
        bind_address = %config.bind_address,
        block_minutes = config.calendar.block_minutes,
        "Starting registrar"
    );

    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path))?;
    let bind_address = config.bind_address.clone();

    let state = AppState::new(config, store);
    state
        .rebuild_index()
        .context("rebuilding the conflict index")?;

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    info!("Listening on {}", bind_address);

    axum::serve(listener, create_router(Arc::new(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving requests")?;

    info!("Registrar stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
