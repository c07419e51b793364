//! Raster decode failures.

use thiserror::Error;
use upstream::UpstreamError;

pub type CogResult<T> = Result<T, CogError>;

#[derive(Debug, Error)]
pub enum CogError {
    #[error("Range read failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Not a TIFF file: {0}")]
    NotTiff(String),

    #[error("BigTIFF is not supported")]
    BigTiff,

    #[error("Read past end of data at offset {offset} (+{length})")]
    Truncated { offset: u64, length: u64 },

    #[error("Missing required TIFF tag: {0}")]
    MissingTag(&'static str),

    #[error("Invalid TIFF structure: {0}")]
    InvalidStructure(String),

    #[error("Unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Raster has no georeferencing")]
    MissingGeoreference,

    #[error("Block decompression failed: {0}")]
    Decompress(String),

    #[error("Window needs {needed} blocks, limit is {limit}")]
    TooManyBlocks { needed: usize, limit: usize },
}

impl CogError {
    pub(crate) fn unsupported(what: &'static str, value: impl ToString) -> Self {
        CogError::Unsupported {
            what,
            value: value.to_string(),
        }
    }

    /// Short machine-readable class for diagnostics.
    pub fn class(&self) -> &'static str {
        match self {
            CogError::Upstream(e) => e.class(),
            CogError::NotTiff(_) | CogError::BigTiff | CogError::InvalidStructure(_) => "format",
            CogError::Truncated { .. } => "truncated",
            CogError::MissingTag(_) => "missing_tag",
            CogError::Unsupported { .. } => "unsupported",
            CogError::UnsupportedCrs(_) | CogError::MissingGeoreference => "georeference",
            CogError::Decompress(_) => "decompress",
            CogError::TooManyBlocks { .. } => "too_many_blocks",
        }
    }
}
