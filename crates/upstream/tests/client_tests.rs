//! Integration tests for the upstream client against a local stub server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use upstream::{HostAllowList, RetryPolicy, UpstreamClient, UpstreamConfig, UpstreamError};

// ============================================================================
// Stub server
// ============================================================================

#[derive(Clone, Default)]
struct Hits {
    flaky: Arc<AtomicUsize>,
    any: Arc<AtomicUsize>,
    /// Requests that arrived addressed to `localhost` rather than `127.0.0.1`
    via_localhost: Arc<AtomicUsize>,
}

fn payload() -> Vec<u8> {
    (0..=255u8).cycle().take(4096).collect()
}

fn parse_range(headers: &HeaderMap) -> Option<(usize, usize)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn ranged(State(hits): State<Hits>, headers: HeaderMap) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    if host_header(&headers).starts_with("localhost") {
        hits.via_localhost.fetch_add(1, Ordering::SeqCst);
    }
    let data = payload();
    match parse_range(&headers) {
        Some((start, end)) if start < data.len() => {
            let end = end.min(data.len() - 1);
            (StatusCode::PARTIAL_CONTENT, data[start..=end].to_vec()).into_response()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => (StatusCode::OK, data).into_response(),
    }
}

async fn ignores_range(State(hits): State<Hits>) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, payload()).into_response()
}

fn host_header(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Same server, reached under a different host name.
async fn redirect_elsewhere(State(hits): State<Hits>, headers: HeaderMap) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    let port = host_header(&headers).rsplit(':').next().unwrap_or("80").to_string();
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("http://localhost:{}/data.bin", port))],
    )
        .into_response()
}

async fn redirect_same_host(State(hits): State<Hits>) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FOUND, [(header::LOCATION, "/data.bin")]).into_response()
}

async fn redirect_loop(State(hits): State<Hits>) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FOUND, [(header::LOCATION, "/loop.bin")]).into_response()
}

async fn flaky(State(hits): State<Hits>) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    let n = hits.flaky.fetch_add(1, Ordering::SeqCst);
    if n < 2 {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        Json(serde_json::json!({ "ok": true, "attempt": n })).into_response()
    }
}

async fn missing(State(hits): State<Hits>) -> Response {
    hits.any.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND.into_response()
}

async fn spawn_stub(hits: Hits) -> SocketAddr {
    let app = Router::new()
        .route("/data.bin", get(ranged))
        .route("/plain.bin", get(ignores_range))
        .route("/elsewhere.bin", get(redirect_elsewhere))
        .route("/moved.bin", get(redirect_same_host))
        .route("/loop.bin", get(redirect_loop))
        .route("/flaky.json", get(flaky))
        .route("/missing.json", get(missing))
        .with_state(hits);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(allowed: &[&str]) -> UpstreamClient {
    UpstreamClient::new(UpstreamConfig {
        request_timeout: Duration::from_secs(5),
        allow_list: HostAllowList::new(allowed.iter().copied()),
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        ..UpstreamConfig::default()
    })
    .unwrap()
}

// ============================================================================
// Range reads
// ============================================================================

#[tokio::test]
async fn test_range_read_returns_exact_slice() {
    let addr = spawn_stub(Hits::default()).await;
    let c = client(&["127.0.0.1"]);

    let bytes = c
        .get_range(&format!("http://{}/data.bin", addr), 300, 16)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 16);
    assert_eq!(bytes[0], (300 % 256) as u8);
    assert_eq!(bytes[15], (315 % 256) as u8);
}

#[tokio::test]
async fn test_range_ignored_by_server_is_an_error() {
    let addr = spawn_stub(Hits::default()).await;
    let c = client(&["127.0.0.1"]);

    let result = c
        .get_range(&format!("http://{}/plain.bin", addr), 1000, 8)
        .await;
    assert!(matches!(result, Err(UpstreamError::RangeUnsupported(_))));

    let result = c
        .get_range_upto(&format!("http://{}/plain.bin", addr), 0, 16 * 1024)
        .await;
    assert!(matches!(result, Err(UpstreamError::RangeUnsupported(_))));
}

#[tokio::test]
async fn test_short_range_is_an_error() {
    let addr = spawn_stub(Hits::default()).await;
    let c = client(&["127.0.0.1"]);

    let result = c
        .get_range(&format!("http://{}/data.bin", addr), 4090, 100)
        .await;
    assert!(matches!(result, Err(UpstreamError::RangeNotSatisfiable { .. })));
}

#[tokio::test]
async fn test_range_upto_accepts_short_file() {
    let addr = spawn_stub(Hits::default()).await;
    let c = client(&["127.0.0.1"]);

    let bytes = c
        .get_range_upto(&format!("http://{}/data.bin", addr), 4090, 100)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 6);
    assert_eq!(bytes[0], (4090 % 256) as u8);
}

// ============================================================================
// Allow-list and retries
// ============================================================================

#[tokio::test]
async fn test_disallowed_host_never_hits_network() {
    let hits = Hits::default();
    let addr = spawn_stub(hits.clone()).await;
    let c = client(&["example.org"]);

    let result = c
        .get_range(&format!("http://{}/data.bin", addr), 0, 8)
        .await;
    assert!(matches!(result, Err(UpstreamError::HostNotAllowed(_))));
    assert_eq!(hits.any.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_redirect_to_disallowed_host_is_refused() {
    let hits = Hits::default();
    let addr = spawn_stub(hits.clone()).await;
    let c = client(&["127.0.0.1"]);

    let result = c
        .get_range(&format!("http://{}/elsewhere.bin", addr), 0, 8)
        .await;
    assert!(matches!(result, Err(UpstreamError::HostNotAllowed(ref host)) if host == "localhost"));
    assert_eq!(hits.via_localhost.load(Ordering::SeqCst), 0);
    assert_eq!(hits.any.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_redirect_within_allow_list_is_followed() {
    let hits = Hits::default();
    let addr = spawn_stub(hits.clone()).await;
    let c = client(&["127.0.0.1"]);

    let bytes = c
        .get_range(&format!("http://{}/moved.bin", addr), 300, 4)
        .await
        .unwrap();
    assert_eq!(bytes[0], (300 % 256) as u8);
    assert_eq!(hits.any.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_redirect_loop_stops() {
    let hits = Hits::default();
    let addr = spawn_stub(hits.clone()).await;
    let c = client(&["127.0.0.1"]);

    let result = c
        .get_range(&format!("http://{}/loop.bin", addr), 0, 8)
        .await;
    assert!(matches!(result, Err(UpstreamError::TooManyRedirects(_))));
    assert!(hits.any.load(Ordering::SeqCst) <= 6);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let hits = Hits::default();
    let addr = spawn_stub(hits.clone()).await;
    let c = client(&["127.0.0.1"]);

    let value: serde_json::Value = c
        .get_json(&format!("http://{}/flaky.json", addr), &[])
        .await
        .unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.flaky.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let hits = Hits::default();
    let addr = spawn_stub(hits.clone()).await;
    let c = client(&["127.0.0.1"]);

    let result: Result<serde_json::Value, _> = c
        .get_json(&format!("http://{}/missing.json", addr), &[])
        .await;
    assert!(matches!(result, Err(UpstreamError::Status { status: 404, .. })));
    assert_eq!(hits.any.load(Ordering::SeqCst), 1);
}
