//! Request/response interceptors registered on an [`UpstreamClient`](crate::UpstreamClient).

use std::time::Duration;

use metrics::{counter, histogram};
use reqwest::{RequestBuilder, Url};
use tracing::debug;

/// What an interceptor sees after an exchange finishes.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// HTTP status, `None` when no response arrived
    pub status: Option<u16>,
    pub elapsed: Duration,
    /// Error class when the exchange failed
    pub error_class: Option<&'static str>,
}

/// Hook into every outbound request made by one client instance.
pub trait Interceptor: Send + Sync {
    /// Adjust the request before it is sent.
    fn before_send(&self, _url: &Url, builder: RequestBuilder) -> RequestBuilder {
        builder
    }

    /// Observe the result.
    fn after_response(&self, _url: &Url, _outcome: &ExchangeOutcome) {}
}

/// Records per-host request counts, status classes and latency.
#[derive(Debug, Default)]
pub struct MetricsInterceptor;

impl Interceptor for MetricsInterceptor {
    fn after_response(&self, url: &Url, outcome: &ExchangeOutcome) {
        let host = url.host_str().unwrap_or("unknown").to_string();
        let class = match outcome.status {
            Some(s) => format!("{}xx", s / 100),
            None => outcome.error_class.unwrap_or("error").to_string(),
        };

        counter!("upstream_requests_total", "host" => host.clone(), "class" => class.clone())
            .increment(1);
        histogram!("upstream_request_duration_seconds", "host" => host.clone())
            .record(outcome.elapsed.as_secs_f64());

        debug!(
            host = %host,
            path = %url.path(),
            class = %class,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Upstream exchange"
        );
    }
}
