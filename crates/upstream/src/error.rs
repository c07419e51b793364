//! Upstream failure classification.

use thiserror::Error;

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Host not in allow-list: {0}")]
    HostNotAllowed(String),

    #[error("Invalid upstream URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Upstream request timed out: {0}")]
    Timeout(String),

    #[error("Upstream connection failed: {0}")]
    Connect(String),

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Upstream response could not be decoded: {0}")]
    Decode(String),

    #[error("Range {offset}+{length} not satisfiable for {url}")]
    RangeNotSatisfiable { url: String, offset: u64, length: u64 },

    #[error("Server does not support range requests: {0}")]
    RangeUnsupported(String),

    #[error("Too many redirects: {0}")]
    TooManyRedirects(String),
}

/// Why the redirect policy refused to follow a hop.
#[derive(Debug, Error)]
pub(crate) enum RedirectRejected {
    #[error("redirect to host outside the allow-list: {0}")]
    Host(String),
    #[error("redirect limit reached")]
    TooMany,
}

impl UpstreamError {
    /// Rate limits, server errors, timeouts and connection failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Timeout(_) | UpstreamError::Connect(_) => true,
            _ => false,
        }
    }

    /// Short machine-readable class for diagnostics.
    pub fn class(&self) -> &'static str {
        match self {
            UpstreamError::HostNotAllowed(_) => "host_not_allowed",
            UpstreamError::InvalidUrl { .. } => "invalid_url",
            UpstreamError::Status { .. } => "http_status",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Connect(_) => "connect",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Decode(_) => "decode",
            UpstreamError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            UpstreamError::RangeUnsupported(_) => "range_unsupported",
            UpstreamError::TooManyRedirects(_) => "too_many_redirects",
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_redirect() {
            if let Some(rejected) = redirect_rejection(&err) {
                return match rejected {
                    RedirectRejected::Host(host) => UpstreamError::HostNotAllowed(host.clone()),
                    RedirectRejected::TooMany => UpstreamError::TooManyRedirects(url.to_string()),
                };
            }
        }
        if err.is_timeout() {
            UpstreamError::Timeout(url.to_string())
        } else if err.is_connect() {
            UpstreamError::Connect(format!("{}: {}", url, err))
        } else if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

fn redirect_rejection(err: &reqwest::Error) -> Option<&RedirectRejected> {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(rejected) = e.downcast_ref::<RedirectRejected>() {
            return Some(rejected);
        }
        source = e.source();
    }
    None
}
