//! Outbound HTTP access for catalog queries and ranged raster reads.
//!
//! Every request leaves through one [`UpstreamClient`]: the host allow-list is
//! checked before any network call, credentials are attached only to hosts
//! they are scoped to, and interceptors registered on the client observe each
//! exchange. Nothing here touches global state.

pub mod allowlist;
pub mod client;
pub mod credentials;
pub mod error;
pub mod interceptor;

pub use allowlist::HostAllowList;
pub use client::{RetryPolicy, UpstreamClient, UpstreamConfig};
pub use credentials::{AuthInterceptor, Credentials};
pub use error::{UpstreamError, UpstreamResult};
pub use interceptor::{ExchangeOutcome, Interceptor, MetricsInterceptor};
