//! Upstream credentials and the interceptor that attaches them.

use reqwest::{RequestBuilder, Url};

use crate::{HostAllowList, Interceptor};

/// Out-of-band credentials for the raster and catalog hosts.
#[derive(Clone)]
pub enum Credentials {
    Bearer(String),
    Basic { username: String, password: String },
}

impl Credentials {
    /// Read credentials from `EARTHDATA_TOKEN`, or `EARTHDATA_USERNAME` + `EARTHDATA_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        if let Ok(token) = std::env::var("EARTHDATA_TOKEN") {
            if !token.trim().is_empty() {
                return Some(Credentials::Bearer(token.trim().to_string()));
            }
        }
        match (
            std::env::var("EARTHDATA_USERNAME"),
            std::env::var("EARTHDATA_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) if !username.is_empty() => {
                Some(Credentials::Basic { username, password })
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Bearer(_) => "bearer",
            Credentials::Basic { .. } => "basic",
        }
    }
}

// Never print secrets, not even in debug logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Credentials::Bearer(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Credentials::Basic {{ username: {:?}, password: *** }}", username)
            }
        }
    }
}

/// Attaches credentials to requests whose host is in `scope`.
#[derive(Debug)]
pub struct AuthInterceptor {
    credentials: Credentials,
    scope: HostAllowList,
}

impl AuthInterceptor {
    pub fn new(credentials: Credentials, scope: HostAllowList) -> Self {
        Self { credentials, scope }
    }
}

impl Interceptor for AuthInterceptor {
    fn before_send(&self, url: &Url, builder: RequestBuilder) -> RequestBuilder {
        if !self.scope.permits(url) {
            return builder;
        }
        match &self.credentials {
            Credentials::Bearer(token) => builder.bearer_auth(token),
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        }
    }
}
