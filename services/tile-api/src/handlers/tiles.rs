//! GET /tiles/{z}/{x}/{y}.png
//!
//! Always 200 with a PNG (or the JSON diagnostic in debug mode). Only
//! malformed coordinates get a 400.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use geo_common::{GeoError, GeoResult, TileCoord};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::common::input_error;
use crate::state::AppState;
use crate::tile_service::{RenderedTile, TileMode};

/// Longest header value we echo back.
const MAX_HEADER_LEN: usize = 256;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TileParams {
    #[serde(alias = "url")]
    pub source_url: Option<String>,
    pub debug: Option<String>,
}

impl TileParams {
    fn wants_debug(&self) -> bool {
        matches!(self.debug.as_deref(), Some("1" | "true"))
    }
}

/// Parse path segments; `y` may carry a `.png` suffix.
pub fn parse_tile_path(z: &str, x: &str, y: &str) -> GeoResult<TileCoord> {
    let y = match y.rsplit_once('.') {
        Some((row, ext)) if ext.eq_ignore_ascii_case("png") => row,
        Some((_, ext)) => return Err(GeoError::invalid("y", format!("unsupported format '{}'", ext))),
        None => y,
    };
    let number = |name: &str, raw: &str| {
        raw.parse::<u32>()
            .map_err(|_| GeoError::invalid(name, format!("'{}' is not a tile index", raw)))
    };
    TileCoord::checked(number("z", z)?, number("x", x)?, number("y", y)?)
}

/// GET /tiles/:z/:x/:y
#[instrument(skip(state, params), fields(request_id = tracing::field::Empty))]
pub async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((z, x, y)): Path<(String, String, String)>,
    Query(params): Query<TileParams>,
) -> Response {
    let coord = match parse_tile_path(&z, &x, &y) {
        Ok(coord) => coord,
        Err(e) => return input_error(&e),
    };

    let request_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", request_id.as_str());

    let tile = state.tiles.render(coord, params.source_url.as_deref()).await;
    let d = &tile.diagnostic;
    info!(
        tile = %coord.cache_key(),
        mode = d.mode.as_str(),
        reason = %d.reason,
        bytes = d.bytes,
        duration_ms = d.duration_ms,
        "Tile served"
    );

    if params.wants_debug() && state.config.debug.enabled {
        let mut response = Json(json!({
            "requestId": request_id,
            "sourceUrl": params.source_url,
            "diagnostic": d,
        }))
        .into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        return response;
    }

    (StatusCode::OK, tile_headers(&tile, &request_id), tile.png).into_response()
}

fn tile_headers(tile: &RenderedTile, request_id: &str) -> HeaderMap {
    let d = &tile.diagnostic;
    let cache_control = match d.mode {
        TileMode::Render => "public, max-age=300",
        TileMode::Fallback | TileMode::Error => "no-store",
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    for (name, value) in [
        ("x-tile-mode", d.mode.as_str().to_string()),
        ("x-tile-reason", d.reason.clone()),
        ("x-tile-stage", d.stage.as_str().to_string()),
        ("x-tile-stats", d.stats_header()),
        ("x-tile-bytes", d.bytes.to_string()),
        ("x-request-id", request_id.to_string()),
    ] {
        headers.insert(HeaderName::from_static(name), header_value(&value));
    }
    headers
}

/// Printable ASCII only, truncated.
fn header_value(raw: &str) -> HeaderValue {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .take(MAX_HEADER_LEN)
        .collect();
    HeaderValue::from_str(&cleaned).unwrap_or_else(|_| HeaderValue::from_static("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tile_path() {
        assert_eq!(parse_tile_path("3", "2", "5.png").unwrap(), TileCoord::new(3, 2, 5));
        assert_eq!(parse_tile_path("3", "2", "5").unwrap(), TileCoord::new(3, 2, 5));
        assert_eq!(parse_tile_path("3", "2", "5.PNG").unwrap(), TileCoord::new(3, 2, 5));
        assert!(parse_tile_path("3", "2", "5.jpg").is_err());
        assert!(parse_tile_path("3", "2", "abc.png").is_err());
        assert!(parse_tile_path("3", "-1", "5.png").is_err());
        assert!(parse_tile_path("3", "8", "5.png").is_err());
        assert!(parse_tile_path("25", "0", "0.png").is_err());
    }

    #[test]
    fn test_header_value_is_sanitized() {
        assert_eq!(header_value("ok reason"), "ok reason");
        assert_eq!(header_value("bad\nvalue"), "bad?value");
        assert_eq!(header_value(&"x".repeat(1000)).len(), MAX_HEADER_LEN);
    }
}
