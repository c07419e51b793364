//! Application state and shared resources.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use catalog::{CatalogClient, GranuleSelector};
use cog_reader::RasterWindowReader;
use storage::{GranuleCache, MemoryGranuleCache, RedisGranuleCache};
use tracing::{info, warn};
use upstream::{AuthInterceptor, Credentials, MetricsInterceptor, UpstreamClient};

use crate::config::{CacheBackend, ServiceConfig};
use crate::discovery::DiscoveryService;
use crate::tile_service::TileService;

/// Shared application state.
pub struct AppState {
    pub config: ServiceConfig,
    pub discovery: DiscoveryService,
    pub tiles: TileService,
}

impl AppState {
    /// Build state with credentials taken from the environment.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        Self::with_credentials(config, Credentials::from_env()).await
    }

    pub async fn with_credentials(config: ServiceConfig, credentials: Option<Credentials>) -> Result<Self> {
        let mut upstream = UpstreamClient::new(config.upstream_config())?.with_interceptor(Arc::new(MetricsInterceptor));
        match credentials {
            Some(credentials) => {
                info!(
                    kind = credentials.kind(),
                    hosts = ?config.upstream.credential_hosts,
                    "Upstream credentials configured"
                );
                upstream = upstream.with_interceptor(Arc::new(AuthInterceptor::new(credentials, config.credential_scope())));
            }
            None => warn!("No upstream credentials configured; protected rasters will fail"),
        }

        let catalog = CatalogClient::new(upstream.clone(), config.catalog.client.clone());
        let selector = GranuleSelector::new(Arc::new(catalog), config.selection.selector.clone());
        let cache = build_cache(&config).await;
        let discovery = DiscoveryService::new(
            selector,
            cache,
            config.catalog.client.collection_id.clone(),
            Duration::from_secs(config.cache.ttl_secs),
        );

        let reader = RasterWindowReader::new(upstream, config.raster.reader.clone());
        let tiles = TileService::new(reader, config.render, config.raster_timeout());

        Ok(Self {
            config,
            discovery,
            tiles,
        })
    }
}

/// Redis when configured and reachable, otherwise the in-process cache.
async fn build_cache(config: &ServiceConfig) -> Arc<dyn GranuleCache> {
    let memory = || Arc::new(MemoryGranuleCache::new(config.cache.capacity)) as Arc<dyn GranuleCache>;
    match config.cache.backend {
        CacheBackend::Memory => memory(),
        CacheBackend::Redis => match RedisGranuleCache::connect(&config.cache.redis_url).await {
            Ok(cache) => {
                info!("Connected to Redis granule cache");
                Arc::new(cache)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, using in-memory granule cache");
                memory()
            }
        },
    }
}
