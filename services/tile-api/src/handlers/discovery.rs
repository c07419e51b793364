//! GET /api/granules - granule discovery for one target cell.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{info, instrument};

use super::common::input_error;
use crate::discovery::DiscoveryParams;
use crate::state::AppState;

/// Invalid input is a 400 with `status: error`. Everything past validation,
/// including a catalog that is down, is a 200 whose `status` says what happened.
#[instrument(skip(state, params))]
pub async fn granules_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<DiscoveryParams>,
) -> Response {
    let now = Utc::now();
    let query = match params.into_query(&state.config.selection, now) {
        Ok(query) => query,
        Err(e) => return input_error(&e),
    };

    let response = state.discovery.discover(&query, now).await;
    info!(
        lat = query.centroid_lat,
        lon = query.centroid_lon,
        status = response.status(),
        "Discovery complete"
    );
    Json(response).into_response()
}
