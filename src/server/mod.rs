//! HTTP interface
//!
//! Serves the handlers in [`handlers`] with request tracing and stops
//! gracefully: the listener closes when the shutdown signal fires, then active
//! runs are cancelled after their current batch.

pub mod handlers;

pub use handlers::{router, AppState};

use crate::config::ServerConfig;
use crate::core::service::DeidService;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Router with tracing middleware
pub fn build_app(service: Arc<DeidService>) -> Router {
    router(AppState { service }).layer(TraceLayer::new_for_http())
}

/// Serves until `shutdown` turns true
pub async fn serve(
    service: Arc<DeidService>,
    config: &ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!(bind = %config.bind, "HTTP server listening");

    axum::serve(listener, build_app(service.clone()))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            tracing::info!("HTTP server shutting down");
        })
        .await
        .context("HTTP server failed")?;

    service
        .coordinator()
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    Ok(())
}
