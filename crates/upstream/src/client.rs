//! The outbound HTTP client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::redirect::Policy;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::RedirectRejected;
use crate::{ExchangeOutcome, HostAllowList, Interceptor, UpstreamError, UpstreamResult};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Retry policy for idempotent catalog requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_delay: Duration,
    /// Maximum retry delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub allow_list: HostAllowList,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(5),
            allow_list: HostAllowList::default(),
            retry: RetryPolicy::default(),
            user_agent: concat!("granule-tiles/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One HTTP client instance with its own allow-list and interceptor chain.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        let client = Client::builder()
            .redirect(redirect_policy(config.allow_list.clone()))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| UpstreamError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            interceptors: Vec::new(),
        })
    }

    /// Register an interceptor. Interceptors run in registration order.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn allow_list(&self) -> &HostAllowList {
        &self.config.allow_list
    }

    /// Parse `raw` and check it against the allow-list without any network I/O.
    pub fn check_url(&self, raw: &str) -> UpstreamResult<Url> {
        let url = Url::parse(raw).map_err(|e| UpstreamError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;
        if !self.config.allow_list.permits(&url) {
            return Err(UpstreamError::HostNotAllowed(
                url.host_str().unwrap_or("").to_string(),
            ));
        }
        Ok(url)
    }

    /// GET a JSON document, retrying transient failures with exponential backoff.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> UpstreamResult<T> {
        let parsed = self.check_url(url)?;
        let mut attempt = 0u32;
        let mut delay = self.config.retry.initial_delay;

        loop {
            let result = self
                .send(&parsed, |b| b.query(query).header(header::ACCEPT, "application/json"))
                .await;

            let outcome = match result {
                Ok(response) => response
                    .json::<T>()
                    .await
                    .map_err(|e| UpstreamError::Decode(format!("{}: {}", url, e))),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        error = %e,
                        retry = attempt,
                        max_retries = self.config.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.retry.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read `length` bytes starting at `offset` with an HTTP Range request.
    ///
    /// A server that ignores the Range header (200 instead of 206) is an
    /// error; the body is never downloaded. Short bodies are an error.
    pub async fn get_range(&self, url: &str, offset: u64, length: u64) -> UpstreamResult<Bytes> {
        let slice = self.fetch_range(url, offset, length).await?;
        if (slice.len() as u64) < length {
            return Err(UpstreamError::RangeNotSatisfiable {
                url: url.to_string(),
                offset,
                length,
            });
        }
        Ok(slice)
    }

    /// Like [`get_range`](Self::get_range) but a file shorter than the
    /// requested range yields whatever bytes exist.
    pub async fn get_range_upto(&self, url: &str, offset: u64, length: u64) -> UpstreamResult<Bytes> {
        self.fetch_range(url, offset, length).await
    }

    async fn fetch_range(&self, url: &str, offset: u64, length: u64) -> UpstreamResult<Bytes> {
        let parsed = self.check_url(url)?;
        if length == 0 {
            return Ok(Bytes::new());
        }
        let end = offset + length - 1;

        let response = self
            .send(&parsed, |b| b.header(header::RANGE, format!("bytes={}-{}", offset, end)))
            .await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            debug!(url = %url, status = response.status().as_u16(), "Server ignored Range header");
            return Err(UpstreamError::RangeUnsupported(url.to_string()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, url))?;

        let keep = body.len().min(length as usize);
        Ok(body.slice(0..keep))
    }

    /// Run the interceptor chain around one exchange. Non-2xx is an error.
    async fn send<F>(&self, url: &Url, customize: F) -> UpstreamResult<Response>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let mut builder = customize(self.client.get(url.clone()));
        for interceptor in &self.interceptors {
            builder = interceptor.before_send(url, builder);
        }

        let started = Instant::now();
        let result = builder.send().await;
        let elapsed = started.elapsed();

        let (outcome, result) = match result {
            Ok(response) => {
                let status = response.status();
                let outcome = ExchangeOutcome {
                    status: Some(status.as_u16()),
                    elapsed,
                    error_class: None,
                };
                if status.is_success() {
                    (outcome, Ok(response))
                } else if status == StatusCode::RANGE_NOT_SATISFIABLE {
                    (
                        outcome,
                        Err(UpstreamError::RangeNotSatisfiable {
                            url: url.to_string(),
                            offset: 0,
                            length: 0,
                        }),
                    )
                } else {
                    (
                        outcome,
                        Err(UpstreamError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        }),
                    )
                }
            }
            Err(e) => {
                let err = UpstreamError::from_reqwest(e, url.as_str());
                (
                    ExchangeOutcome {
                        status: None,
                        elapsed,
                        error_class: Some(err.class()),
                    },
                    Err(err),
                )
            }
        };

        for interceptor in &self.interceptors {
            interceptor.after_response(url, &outcome);
        }
        result
    }
}

/// Follow a redirect only when the next hop is itself allowed.
fn redirect_policy(allow_list: HostAllowList) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(RedirectRejected::TooMany);
        }
        if allow_list.permits(attempt.url()) {
            attempt.follow()
        } else {
            let host = attempt.url().host_str().unwrap_or("").to_string();
            warn!(host = %host, "Refusing redirect to host outside the allow-list");
            attempt.error(RedirectRejected::Host(host))
        }
    })
}
