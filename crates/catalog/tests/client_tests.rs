//! CatalogClient against a local CMR-style stub.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use catalog::{CatalogClient, CatalogConfig, CatalogError};
use chrono::{TimeZone, Utc};
use geo_common::{BoundingBox, TimeWindow};
use serde_json::Value;
use test_utils::catalog::{cmr_feed, CmrEntryBuilder};
use upstream::{HostAllowList, RetryPolicy, UpstreamClient, UpstreamConfig};

// ============================================================================
// Stub catalog
// ============================================================================

#[derive(Clone)]
struct Catalog {
    /// Pages served in order; `None` answers with `failure_status`.
    pages: Arc<Vec<Option<Vec<Value>>>>,
    failure_status: StatusCode,
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn granules(State(catalog): State<Catalog>, Query(params): Query<HashMap<String, String>>) -> Response {
    let page: usize = params.get("page_num").and_then(|p| p.parse().ok()).unwrap_or(1);
    catalog.requests.lock().unwrap().push(params);

    match catalog.pages.get(page - 1) {
        Some(Some(entries)) => Json(cmr_feed(entries.clone())).into_response(),
        Some(None) => catalog.failure_status.into_response(),
        None => Json(cmr_feed(vec![])).into_response(),
    }
}

async fn spawn_catalog(pages: Vec<Option<Vec<Value>>>, failure_status: StatusCode) -> (SocketAddr, Catalog) {
    let catalog = Catalog {
        pages: Arc::new(pages),
        failure_status,
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/search/granules.json", get(granules))
        .with_state(catalog.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, catalog)
}

fn client(addr: SocketAddr, page_size: u32) -> CatalogClient {
    let upstream = UpstreamClient::new(UpstreamConfig {
        allow_list: HostAllowList::new(["127.0.0.1"]),
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        },
        ..UpstreamConfig::default()
    })
    .unwrap();
    CatalogClient::new(
        upstream,
        CatalogConfig {
            base_url: format!("http://{}/search/", addr),
            collection_id: "C123-LPCLOUD".to_string(),
            page_size,
            max_pages: 3,
            asset_suffix: Some("_LST.tif".to_string()),
        },
    )
}

fn entry(id: &str, day: u32) -> Value {
    CmrEntryBuilder::new(id)
        .time_start(&format!("2024-06-{:02}T10:30:00Z", day))
        .bbox(46.0, 10.0, 48.0, 12.0)
        .link(&format!("https://data.example.org/{}/{}_QC.tif", id, id))
        .link(&format!("https://data.example.org/{}/{}_LST.tif", id, id))
        .build()
}

fn region() -> BoundingBox {
    BoundingBox::new(11.0, 47.0, 11.2, 47.2)
}

fn window() -> TimeWindow {
    TimeWindow::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 8, 31, 23, 59, 59).unwrap(),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_query_parameters() {
    let (addr, catalog) = spawn_catalog(vec![Some(vec![entry("G1", 3)])], StatusCode::OK).await;
    let outcome = client(addr, 10).search(&region(), &window()).await;
    assert!(outcome.failure.is_none());

    let requests = catalog.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let params = &requests[0];
    assert_eq!(params["collection_concept_id"], "C123-LPCLOUD");
    assert_eq!(params["bounding_box"], "11,47,11.2,47.2");
    assert_eq!(params["temporal"], "2024-06-01T00:00:00Z,2024-08-31T23:59:59Z");
    assert_eq!(params["page_size"], "10");
    assert_eq!(params["sort_key"], "-start_date");
}

#[tokio::test]
async fn test_paginates_until_short_page_and_sorts_newest_first() {
    let pages = vec![
        Some(vec![entry("G1", 3), entry("G2", 20)]),
        Some(vec![entry("G3", 11)]),
        Some(vec![entry("NEVER", 30)]),
    ];
    let (addr, catalog) = spawn_catalog(pages, StatusCode::OK).await;
    let outcome = client(addr, 2).search(&region(), &window()).await;

    assert_eq!(catalog.requests.lock().unwrap().len(), 2);
    assert_eq!(outcome.pages_fetched, 2);
    let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["G2", "G3", "G1"]);
    assert_eq!(outcome.records[0].data_links[0], "https://data.example.org/G2/G2_LST.tif");
}

#[tokio::test]
async fn test_page_cap() {
    let full = || Some(vec![entry("A", 1), entry("B", 2)]);
    let pages = vec![full(), full(), full(), full(), full()];
    let (addr, catalog) = spawn_catalog(pages, StatusCode::OK).await;
    let outcome = client(addr, 2).search(&region(), &window()).await;

    assert_eq!(catalog.requests.lock().unwrap().len(), 3);
    // Same ids on every page collapse to one record each.
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn test_failure_keeps_earlier_pages() {
    let pages = vec![Some(vec![entry("G1", 3), entry("G2", 4)]), None];
    let (addr, _) = spawn_catalog(pages, StatusCode::BAD_REQUEST).await;
    let outcome = client(addr, 2).search(&region(), &window()).await;

    assert_eq!(outcome.records.len(), 2);
    assert!(matches!(outcome.failure, Some(CatalogError::Upstream(_))));
}

#[tokio::test]
async fn test_unavailable_catalog_returns_empty_outcome() {
    let (addr, catalog) = spawn_catalog(vec![None], StatusCode::SERVICE_UNAVAILABLE).await;
    let outcome = client(addr, 2).search(&region(), &window()).await;

    assert!(outcome.records.is_empty());
    assert!(outcome.failure.as_ref().map(|e| e.is_transient()).unwrap_or(false));
    // first attempt plus one retry
    assert_eq!(catalog.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_entries_are_counted() {
    let bad = serde_json::json!({ "id": "BAD", "time_start": "not a date" });
    let (addr, _) = spawn_catalog(vec![Some(vec![entry("G1", 3), bad])], StatusCode::OK).await;
    let outcome = client(addr, 10).search(&region(), &window()).await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.malformed, 1);
}
