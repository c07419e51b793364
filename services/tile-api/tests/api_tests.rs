//! End-to-end tests through the router: a stub catalog for discovery and a
//! local range server for raster reads.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use test_utils::catalog::{cmr_feed, CmrEntryBuilder};
use test_utils::fixtures::{bavaria_all_nodata, bavaria_lst};
use test_utils::server::RangeServer;
use tile_api::config::ServiceConfig;
use tile_api::state::AppState;
use tower::ServiceExt;

// ============================================================================
// Harness
// ============================================================================

#[derive(Clone)]
struct StubCatalog {
    /// `None` answers every search with a 500
    entries: Option<Arc<Vec<Value>>>,
    requests: Arc<AtomicUsize>,
}

async fn search(State(catalog): State<StubCatalog>) -> Response {
    catalog.requests.fetch_add(1, Ordering::SeqCst);
    match &catalog.entries {
        // One page only; later pages come back empty
        Some(entries) if catalog.requests.load(Ordering::SeqCst) == 1 => {
            Json(cmr_feed(Vec::clone(entries))).into_response()
        }
        Some(_) => Json(cmr_feed(vec![])).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn spawn_catalog(entries: Option<Vec<Value>>) -> (SocketAddr, Arc<AtomicUsize>) {
    let catalog = StubCatalog {
        entries: entries.map(Arc::new),
        requests: Arc::new(AtomicUsize::new(0)),
    };
    let requests = catalog.requests.clone();
    let app = Router::new()
        .route("/search/granules.json", get(search))
        .with_state(catalog);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, requests)
}

fn test_config(catalog: Option<SocketAddr>) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    if let Some(addr) = catalog {
        config.catalog.client.base_url = format!("http://{}/search", addr);
    }
    config.catalog.client.collection_id = "C123-LPCLOUD".to_string();
    config.catalog.retries = 0;
    config.upstream.allowed_hosts = vec!["127.0.0.1".to_string()];
    config
}

async fn app(config: ServiceConfig) -> Router {
    let state = AppState::with_credentials(config, None).await.unwrap();
    let handle = PrometheusBuilder::new().build_recorder().handle();
    tile_api::router(Arc::new(state), handle)
}

async fn get_response(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

fn munich_entries() -> Vec<Value> {
    vec![
        CmrEntryBuilder::new("G2")
            .time_start("2024-07-10T10:30:00Z")
            .cloud_cover(60.0)
            .bbox(47.0, 10.0, 49.0, 13.0)
            .link("https://data.example.com/G2_LST.tif")
            .build(),
        CmrEntryBuilder::new("G1")
            .time_start("2024-06-10T10:30:00Z")
            .cloud_cover(10.0)
            .bbox(47.0, 10.0, 49.0, 13.0)
            .link("https://data.example.com/G1_LST.tif")
            .build(),
    ]
}

const MUNICH_SUMMER: &str = "/api/granules?lat=48.137&lon=11.575&dateFrom=2024-06-01&dateTo=2024-08-31";

/// Covers lon [10.547, 11.25], lat [48.01, 48.45]: inside the Bavaria fixture.
const INSIDE_TILE: &str = "/tiles/9/271/177.png";

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_match_ranks_clearer_granule_first() {
    let (addr, _) = spawn_catalog(Some(munich_entries())).await;
    let app = app(test_config(Some(addr))).await;

    let response = get_response(&app, MUNICH_SUMMER).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["status"], "match");
    assert_eq!(body["cached"], false);
    assert_eq!(body["candidatesChecked"], 2);
    let granules = body["granules"].as_array().unwrap();
    assert_eq!(granules.len(), 2);
    assert_eq!(granules[0]["id"], "G1");
    assert_eq!(granules[1]["id"], "G2");
    assert_eq!(body["best"]["id"], "G1");
    assert_eq!(body["best"]["url"], "https://data.example.com/G1_LST.tif");
    assert_eq!(body["best"]["datetime"], "2024-06-10T10:30:00Z");
    assert_eq!(body["best"]["coveragePercent"], 100.0);
    assert!(granules[0]["qualityScore"].as_f64().unwrap() > granules[1]["qualityScore"].as_f64().unwrap());
}

#[tokio::test]
async fn test_discovery_second_request_is_cached() {
    let (addr, requests) = spawn_catalog(Some(munich_entries())).await;
    let app = app(test_config(Some(addr))).await;

    let first = body_json(get_response(&app, MUNICH_SUMMER).await).await;
    assert_eq!(first["cached"], false);
    let searches = requests.load(Ordering::SeqCst);
    assert!(searches >= 1);

    let second = body_json(get_response(&app, MUNICH_SUMMER).await).await;
    assert_eq!(second["status"], "match");
    assert_eq!(second["cached"], true);
    assert_eq!(second["best"]["id"], "G1");
    assert_eq!(second["granules"].as_array().unwrap().len(), 1);
    assert_eq!(requests.load(Ordering::SeqCst), searches);
}

#[tokio::test]
async fn test_discovery_empty_catalog_is_no_coverage() {
    let (addr, _) = spawn_catalog(Some(vec![])).await;
    let app = app(test_config(Some(addr))).await;

    let response = get_response(&app, MUNICH_SUMMER).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "no_coverage");
    assert_eq!(body["candidatesChecked"], 0);
    assert!(body["message"].as_str().unwrap().contains("48.1370"));
}

#[tokio::test]
async fn test_discovery_catalog_failure_is_error_status() {
    let (addr, _) = spawn_catalog(None).await;
    let app = app(test_config(Some(addr))).await;

    let response = get_response(&app, MUNICH_SUMMER).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert!(!body["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_discovery_invalid_input_is_bad_request() {
    let (addr, requests) = spawn_catalog(Some(munich_entries())).await;
    let app = app(test_config(Some(addr))).await;

    for uri in [
        "/api/granules?lat=91&lon=11",
        "/api/granules?lat=abc&lon=11",
        "/api/granules?lon=11",
        "/api/granules?lat=48&lon=11&dateTo=2024-08-31",
        "/api/granules?lat=48&lon=11&maxGranules=1000",
    ] {
        let response = get_response(&app, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error", "{}", uri);
    }
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Tiles
// ============================================================================

#[tokio::test]
async fn test_tile_renders_inside_raster() {
    let server = RangeServer::serve([("lst.tif", bavaria_lst().build())]).await;
    let app = app(test_config(None)).await;

    let uri = format!("{}?source_url={}", INSIDE_TILE, server.url("lst.tif"));
    let response = get_response(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), "image/png");
    assert_eq!(header_str(&response, "x-tile-mode"), "render");
    assert_eq!(header_str(&response, "x-tile-stage"), "encode");
    assert_eq!(header_str(&response, header::CACHE_CONTROL.as_str()), "public, max-age=300");
    assert!(header_str(&response, "x-tile-stats").starts_with("valid="));
    assert!(!header_str(&response, "x-request-id").is_empty());

    let png = body_bytes(response).await;
    let image = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (256, 256));
    assert!(image.pixels().any(|p| p[3] > 0));
    assert!(server.requests() > 0);
}

#[tokio::test]
async fn test_tile_without_source_is_fallback() {
    let app = app(test_config(None)).await;

    let response = get_response(&app, "/tiles/3/1/1.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-tile-mode"), "fallback");
    assert_eq!(header_str(&response, "x-tile-reason"), "no source url");
    assert_eq!(header_str(&response, "x-tile-stats"), "none");
    assert_eq!(header_str(&response, header::CACHE_CONTROL.as_str()), "no-store");

    let png = body_bytes(response).await;
    let image = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (256, 256));
    assert!(image.pixels().all(|p| p[3] == 0));
}

#[tokio::test]
async fn test_tile_outside_raster_is_fallback() {
    let server = RangeServer::serve([("lst.tif", bavaria_lst().build())]).await;
    let app = app(test_config(None)).await;

    let uri = format!("/tiles/9/0/0.png?source_url={}", server.url("lst.tif"));
    let response = get_response(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-tile-mode"), "fallback");
    assert_eq!(header_str(&response, "x-tile-reason"), "outside image bounds");
    assert_eq!(header_str(&response, header::CACHE_CONTROL.as_str()), "no-store");
}

#[tokio::test]
async fn test_tile_all_nodata_is_fallback() {
    let server = RangeServer::serve([("empty.tif", bavaria_all_nodata().build())]).await;
    let app = app(test_config(None)).await;

    let uri = format!("{}?source_url={}", INSIDE_TILE, server.url("empty.tif"));
    let response = get_response(&app, &uri).await;
    assert_eq!(header_str(&response, "x-tile-mode"), "fallback");
    assert_eq!(header_str(&response, "x-tile-reason"), "all pixels are no-data");
    assert!(header_str(&response, "x-tile-stats").starts_with("valid=0;"));
}

#[tokio::test]
async fn test_tile_disallowed_host_is_error_without_fetch() {
    let server = RangeServer::serve([("lst.tif", bavaria_lst().build())]).await;
    let app = app(test_config(None)).await;

    let uri = format!("{}?source_url=https://evil.example.com/lst.tif", INSIDE_TILE);
    let response = get_response(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-tile-mode"), "error");
    assert_eq!(header_str(&response, header::CACHE_CONTROL.as_str()), "no-store");
    assert_eq!(server.requests(), 0);

    let png = body_bytes(response).await;
    assert!(image::load_from_memory(&png).is_ok());
}

#[tokio::test]
async fn test_tile_missing_file_is_error() {
    let server = RangeServer::serve([("lst.tif", bavaria_lst().build())]).await;
    let app = app(test_config(None)).await;

    let uri = format!("{}?source_url={}", INSIDE_TILE, server.url("missing.tif"));
    let response = get_response(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-tile-mode"), "error");
    assert_eq!(header_str(&response, "x-tile-stage"), "fetch_and_decode");
}

#[tokio::test]
async fn test_malformed_tile_coordinates_are_bad_request() {
    let app = app(test_config(None)).await;

    for uri in ["/tiles/3/9/1.png", "/tiles/a/0/0.png", "/tiles/3/1/1.jpg", "/tiles/30/0/0.png"] {
        let response = get_response(&app, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error", "{}", uri);
    }
}

#[tokio::test]
async fn test_debug_payload_requires_config() {
    let server = RangeServer::serve([("lst.tif", bavaria_lst().build())]).await;
    let uri = format!("{}?source_url={}&debug=1", INSIDE_TILE, server.url("lst.tif"));

    // Disabled: still a PNG
    let app_off = app(test_config(None)).await;
    let response = get_response(&app_off, &uri).await;
    assert_eq!(header_str(&response, "content-type"), "image/png");

    let mut config = test_config(None);
    config.debug.enabled = true;
    let app_on = app(config).await;
    let response = get_response(&app_on, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "content-type").starts_with("application/json"));
    assert_eq!(header_str(&response, header::CACHE_CONTROL.as_str()), "no-store");

    let body = body_json(response).await;
    assert_eq!(body["diagnostic"]["mode"], "render");
    assert_eq!(body["diagnostic"]["tile"]["z"], 9);
    assert_eq!(body["diagnostic"]["width"], 256);
    assert!(body["diagnostic"]["stats"]["valid"].as_u64().unwrap() > 0);
    assert_eq!(body["sourceUrl"], server.url("lst.tif"));
    assert!(body["requestId"].as_str().is_some());
}

// ============================================================================
// Operational
// ============================================================================

#[tokio::test]
async fn test_health_and_metrics() {
    let app = app(test_config(None)).await;

    let response = get_response(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"OK");

    let response = get_response(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "content-type").starts_with("text/plain"));
}
