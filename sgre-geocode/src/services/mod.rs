//! Services for the geocoding stage

pub mod batch_geocoder;
pub mod geocoding_client;
pub mod onemap;

pub use batch_geocoder::{ArtifactNames, BatchGeocodingOrchestrator, GeocodingOutput, GeocodingReport};
pub use geocoding_client::{BatchOptions, BatchResult, GeocodeOutcome, GeocodingClient};
pub use onemap::{GeocodeBackend, OneMapBackend, SearchHit};
