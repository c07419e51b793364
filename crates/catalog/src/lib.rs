//! Granule discovery: catalog search, footprint resolution, quality scoring
//! and the selection pipeline that ties them together.

pub mod client;
pub mod cmr;
pub mod error;
pub mod footprint;
pub mod scoring;
pub mod selector;
pub mod source;

pub use client::{CatalogClient, CatalogConfig};
pub use cmr::{CatalogRecord, CmrEntry, CmrResponse};
pub use error::{CatalogError, CatalogResult};
pub use footprint::Footprint;
pub use scoring::{DaytimeBand, QualityScorer};
pub use selector::{
    GranuleSelector, NearestCandidate, SelectionDiagnostics, SelectionOutcome, SelectionStatus,
    SelectorConfig,
};
pub use source::{CatalogOutcome, GranuleSource};
