//! Extractors that derive geocoding inputs from raw transaction tables

pub mod address_extractor;

pub use address_extractor::{normalize_address, AddressExtractor, PropertyTypePolicy};
