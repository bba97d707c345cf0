//! HTTP API.
//!
//! Thin JSON layer over the engine: health, observation ingestion and
//! reads, opportunity listing, floor lookup, on-demand detection and
//! back-testing. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Bind the API port and serve in a background task.
///
/// Binding happens before returning so a taken port fails startup.
pub async fn spawn_api(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::get_status))
        .route("/api/opportunities", get(routes::get_opportunities))
        .route("/api/listings", get(routes::get_listings))
        .route("/api/sales", get(routes::get_sales))
        .route("/api/observations", post(routes::post_observations))
        .route("/api/floor", get(routes::get_floor))
        .route("/api/detect", post(routes::post_detect))
        .route("/api/backtest", get(routes::get_backtest))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
