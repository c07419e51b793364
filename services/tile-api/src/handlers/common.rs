//! Shared response helpers.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use geo_common::GeoError;
use serde_json::json;

/// `{"status": "error", "message": ...}` with the error's status code.
pub fn input_error(err: &GeoError) -> Response {
    let status = StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        Json(json!({
            "status": "error",
            "message": err.to_string(),
        })),
    )
        .into_response()
}
