//! Error types shared by the discovery and tiling services.

use thiserror::Error;

/// Result type alias using GeoError.
pub type GeoResult<T> = Result<T, GeoError>;

/// Input-level errors. Everything that reaches upstream services has its own
/// error type in the crate that talks to it.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Invalid tile coordinates z={z} x={x} y={y}: {message}")]
    InvalidTile {
        z: u32,
        x: u32,
        y: u32,
        message: String,
    },

    #[error("Invalid bbox: {0}")]
    InvalidBbox(String),

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),
}

impl GeoError {
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        GeoError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        400
    }
}

impl From<crate::bbox::BboxParseError> for GeoError {
    fn from(err: crate::bbox::BboxParseError) -> Self {
        GeoError::InvalidBbox(err.to_string())
    }
}

impl From<crate::time::TimeParseError> for GeoError {
    fn from(err: crate::time::TimeParseError) -> Self {
        GeoError::InvalidTime(err.to_string())
    }
}
