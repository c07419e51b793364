use thiserror::Error;
use upstream::UpstreamError;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Catalog query timed out after {0} ms")]
    Timeout(u64),

    #[error("Malformed catalog record: {0}")]
    MalformedRecord(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogError::Upstream(e) => e.is_transient(),
            CatalogError::Timeout(_) => true,
            CatalogError::MalformedRecord(_) => false,
        }
    }
}
