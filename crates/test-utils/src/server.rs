//! A local static file server that honors HTTP Range requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

#[derive(Clone)]
struct Files {
    files: Arc<HashMap<String, Vec<u8>>>,
    requests: Arc<AtomicUsize>,
}

/// Serves in-memory files on `127.0.0.1` at an ephemeral port.
pub struct RangeServer {
    pub addr: SocketAddr,
    requests: Arc<AtomicUsize>,
}

impl RangeServer {
    pub async fn serve<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: Into<String>,
    {
        let state = Files {
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(k, v)| (k.into().trim_start_matches('/').to_string(), v))
                    .collect(),
            ),
            requests: Arc::new(AtomicUsize::new(0)),
        };
        let requests = state.requests.clone();
        let app = Router::new().route("/*path", get(serve_file)).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Number of requests served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn serve_file(State(state): State<Files>, Path(path): Path<String>, headers: HeaderMap) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let Some(data) = state.files.get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some((start, end)) = parse_range(&headers) else {
        return (StatusCode::OK, data.clone()).into_response();
    };
    if start >= data.len() {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    let end = end.min(data.len() - 1);
    (
        StatusCode::PARTIAL_CONTENT,
        [(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, data.len()),
        )],
        data[start..=end].to_vec(),
    )
        .into_response()
}

fn parse_range(headers: &HeaderMap) -> Option<(usize, usize)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
