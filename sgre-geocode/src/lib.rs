//! sgre-geocode library interface
//!
//! L1 stage of the Singapore real-estate pipeline: extract unique addresses
//! from the L0 transaction tables, geocode the ones not seen before through
//! OneMap, and persist full and best-match location tables.

pub mod error;
pub mod extractors;
pub mod ingest;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{GeocodeError, PipelineError, PipelineResult};
pub use crate::extractors::{AddressExtractor, PropertyTypePolicy};
pub use crate::services::{
    BatchGeocodingOrchestrator, BatchOptions, GeocodeBackend, GeocodingClient, GeocodingReport,
};

/// Artifact holding the extracted address list
pub const UNIQUE_ADDRESSES_DATASET: &str = "L1_unique_addresses";
