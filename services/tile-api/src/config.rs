//! Service configuration.
//!
//! Loaded from an optional YAML file; every section and field has a default,
//! so an empty file (or none at all) yields a working development setup.
//! Upstream credentials are never part of this file: they come from
//! `EARTHDATA_TOKEN` or `EARTHDATA_USERNAME` + `EARTHDATA_PASSWORD`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use catalog::{CatalogConfig, SelectorConfig};
use cog_reader::ReaderConfig;
use renderer::ColorRamp;
use serde::{Deserialize, Serialize};
use tracing::info;
use upstream::{HostAllowList, RetryPolicy, UpstreamConfig};

/// Upper bound on granules returned by one discovery request.
pub const MAX_GRANULES_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub catalog: CatalogSection,
    pub selection: SelectionSection,
    pub raster: RasterSection,
    pub render: ColorRamp,
    pub upstream: UpstreamSection,
    pub cache: CacheSection,
    pub debug: DebugSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    #[serde(flatten)]
    pub client: CatalogConfig,
    /// Per-request timeout in seconds
    pub timeout_secs: f64,
    /// Retries for transient failures (429, 5xx, timeouts)
    pub retries: u32,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            client: CatalogConfig::default(),
            timeout_secs: 20.0,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSection {
    #[serde(flatten)]
    pub selector: SelectorConfig,
    /// Used when a request does not say
    pub max_granules: usize,
    /// Cloud ceiling in percent when a request does not say
    pub max_cloud_percent: f64,
    /// Half-width of the region around the centroid when no bbox is given
    pub region_half_extent_deg: f64,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            max_granules: 10,
            max_cloud_percent: 100.0,
            region_half_extent_deg: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterSection {
    #[serde(flatten)]
    pub reader: ReaderConfig,
    /// Budget for one whole tile read, header through last block
    pub request_timeout_secs: f64,
}

impl Default for RasterSection {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            request_timeout_secs: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    /// Hosts (and their subdomains) any outbound request may reach
    pub allowed_hosts: Vec<String>,
    /// Hosts that receive the configured credentials
    pub credential_hosts: Vec<String>,
    pub connect_timeout_secs: f64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            allowed_hosts: vec![
                "cmr.earthdata.nasa.gov".to_string(),
                "earthdata.nasa.gov".to_string(),
                "lpdaac.earthdatacloud.nasa.gov".to_string(),
            ],
            credential_hosts: vec![
                "urs.earthdata.nasa.gov".to_string(),
                "lpdaac.earthdatacloud.nasa.gov".to_string(),
            ],
            connect_timeout_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_secs: u64,
    /// Entry limit for the memory backend
    pub capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ttl_secs: 6 * 3600,
            capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    /// Allow `?debug=1` diagnostic payloads
    pub enabled: bool,
}

impl ServiceConfig {
    /// Load from `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let config: ServiceConfig = serde_yaml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                info!(path = %path.display(), "Loaded service configuration");
                config
            }
            None => ServiceConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            if !url.is_empty() {
                self.cache.redis_url = url;
            }
        }
        if let Ok(collection) = std::env::var("CATALOG_COLLECTION_ID") {
            if !collection.is_empty() {
                self.catalog.client.collection_id = collection;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let tile_size = self.raster.reader.tile_size;
        if tile_size == 0 || tile_size > 1024 {
            bail!("raster.tile_size must be within 1..=1024, got {}", tile_size);
        }
        if !(self.render.domain_min < self.render.domain_max) {
            bail!(
                "render.domain_min ({}) must be below render.domain_max ({})",
                self.render.domain_min,
                self.render.domain_max
            );
        }
        if self.selection.max_granules == 0 || self.selection.max_granules > MAX_GRANULES_LIMIT {
            bail!("selection.max_granules must be within 1..={}", MAX_GRANULES_LIMIT);
        }
        let months = 1..=12;
        if !months.contains(&self.selection.selector.warm_season_start_month)
            || !months.contains(&self.selection.selector.warm_season_end_month)
        {
            bail!("selection warm season months must be within 1..=12");
        }
        for (name, secs) in [
            ("catalog.timeout_secs", self.catalog.timeout_secs),
            ("raster.request_timeout_secs", self.raster.request_timeout_secs),
            ("upstream.connect_timeout_secs", self.upstream.connect_timeout_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                bail!("{} must be a positive number of seconds", name);
            }
        }
        if self.upstream.allowed_hosts.is_empty() {
            bail!("upstream.allowed_hosts must not be empty");
        }
        Ok(())
    }

    /// Client settings shared by the catalog and raster reads.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            request_timeout: Duration::from_secs_f64(self.catalog.timeout_secs.max(self.raster.request_timeout_secs)),
            connect_timeout: Duration::from_secs_f64(self.upstream.connect_timeout_secs),
            allow_list: HostAllowList::new(self.upstream.allowed_hosts.iter().cloned()),
            retry: RetryPolicy {
                max_retries: self.catalog.retries,
                ..RetryPolicy::default()
            },
            ..UpstreamConfig::default()
        }
    }

    pub fn credential_scope(&self) -> HostAllowList {
        HostAllowList::new(self.upstream.credential_hosts.iter().cloned())
    }

    pub fn raster_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.raster.request_timeout_secs)
    }
}
