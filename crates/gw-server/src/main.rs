//! # Gateway Server
//!
//! WebSocket tunnels between display clients and the display server,
//! with per-tunnel daily and monthly time quotas, plus a small admin API.

mod api;
mod quota;
mod tunnel;
mod workers;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Shared application state available to all handlers.
pub struct AppState {
    pub config: gw_common::AppConfig,
    pub registry: ws::registry::TunnelRegistry,
    pub scheduler: workers::TickerScheduler,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Load configuration
    let config = gw_common::AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .json()
        .init();

    tracing::info!(
        backend = %config.backend.address(),
        daily_limit_secs = ?config.quota.daily_limit_secs,
        monthly_limit_secs = ?config.quota.monthly_limit_secs,
        "Starting gateway server..."
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        registry: ws::registry::TunnelRegistry::new(),
        scheduler: workers::TickerScheduler::new(),
    });

    // Build router
    let app = Router::new()
        .nest("/api", api::router(state.clone()))
        .nest("/ws", ws::router(state.clone()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop every ticker before the runtime goes away
    state.scheduler.shutdown().await;
    tracing::info!("Gateway server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
