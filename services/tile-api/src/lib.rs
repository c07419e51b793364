//! Granule discovery and raster tile service.
//!
//! The library half exists so the router can be exercised in tests without
//! binding a socket.

pub mod config;
pub mod discovery;
pub mod handlers;
pub mod state;
pub mod tile_service;

use std::sync::Arc;

use axum::{extract::Extension, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use state::AppState;

pub fn router(state: Arc<AppState>, prometheus_handle: PrometheusHandle) -> Router {
    Router::new()
        // XYZ tiles; y is "N.png"
        .route("/tiles/:z/:x/:y", get(handlers::tile_handler))
        // Discovery API
        .route("/api/granules", get(handlers::granules_handler))
        // Health check
        .route("/health", get(handlers::health_handler))
        // Metrics
        .route("/metrics", get(handlers::metrics_handler))
        .layer(Extension(state))
        .layer(Extension(prometheus_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
