//! Byte-range sources for raster files.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use upstream::UpstreamClient;

use crate::{CogError, CogResult};

/// Random access to a raster file. Implementations must return exactly
/// `length` bytes or an error.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn read_range(&self, offset: u64, length: u64) -> CogResult<Bytes>;

    /// Up to `max_len` bytes from the start of the file. Shorter files
    /// return everything they have.
    async fn read_prefix(&self, max_len: u64) -> CogResult<Bytes>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// A remote file read with HTTP Range requests.
pub struct HttpRangeSource {
    client: UpstreamClient,
    url: String,
}

impl HttpRangeSource {
    /// Fails without any network I/O if the URL's host is not allowed.
    pub fn new(client: UpstreamClient, url: &str) -> CogResult<Self> {
        client.check_url(url)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn read_range(&self, offset: u64, length: u64) -> CogResult<Bytes> {
        counter!("cog_range_requests_total").increment(1);
        let bytes = self.client.get_range(&self.url, offset, length).await?;
        counter!("cog_range_bytes_total").increment(bytes.len() as u64);
        Ok(bytes)
    }

    async fn read_prefix(&self, max_len: u64) -> CogResult<Bytes> {
        counter!("cog_range_requests_total").increment(1);
        let bytes = self.client.get_range_upto(&self.url, 0, max_len).await?;
        counter!("cog_range_bytes_total").increment(bytes.len() as u64);
        Ok(bytes)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// An in-memory file. Counts reads so tests can assert on access patterns.
pub struct MemorySource {
    data: Bytes,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RangeSource for MemorySource {
    async fn read_range(&self, offset: u64, length: u64) -> CogResult<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let start = offset as usize;
        let end = start.saturating_add(length as usize);
        if end > self.data.len() {
            return Err(CogError::Truncated { offset, length });
        }
        Ok(self.data.slice(start..end))
    }

    async fn read_prefix(&self, max_len: u64) -> CogResult<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let end = self.data.len().min(max_len as usize);
        Ok(self.data.slice(0..end))
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.data.len())
    }
}
