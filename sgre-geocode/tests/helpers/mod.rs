//! Test Helper Utilities
//!
//! Scriptable geocoding backend and store fixtures shared by the
//! orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sgre_common::config::GeocodingConfig;
use sgre_common::{ArtifactStore, PipelineConfig, SaveOptions};
use sgre_geocode::models::{AddressRecord, GeocodedAddress, PropertyType};
use sgre_geocode::services::{ArtifactNames, SearchHit};
use sgre_geocode::{BatchGeocodingOrchestrator, BatchOptions, GeocodeBackend, GeocodeError, GeocodingClient};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory backend that records every call
#[derive(Default)]
pub struct FakeBackend {
    matches: HashMap<String, (f64, f64)>,
    broken: HashSet<String>,
    reject_auth: bool,
    auths: AtomicUsize,
    searched: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, address: &str, latitude: f64, longitude: f64) -> Self {
        self.matches.insert(address.to_string(), (latitude, longitude));
        self
    }

    /// Every search for `address` fails with a network error
    pub fn with_network_failure(mut self, address: &str) -> Self {
        self.broken.insert(address.to_string());
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn auth_calls(&self) -> usize {
        self.auths.load(Ordering::SeqCst)
    }

    pub fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }

    pub fn search_calls(&self) -> usize {
        self.searched.lock().unwrap().len()
    }
}

#[async_trait]
impl GeocodeBackend for FakeBackend {
    async fn authenticate(&self) -> Result<String, GeocodeError> {
        self.auths.fetch_add(1, Ordering::SeqCst);
        if self.reject_auth {
            Err(GeocodeError::AuthFailed("HTTP 401: invalid credentials".to_string()))
        } else {
            Ok("test-token".to_string())
        }
    }

    async fn search(&self, _token: &str, query: &str) -> Result<Vec<SearchHit>, GeocodeError> {
        self.searched.lock().unwrap().push(query.to_string());

        if self.broken.contains(query) {
            return Err(GeocodeError::NetworkError("connection reset by peer".to_string()));
        }
        Ok(match self.matches.get(query) {
            Some(&(lat, lon)) => vec![hit(query, lat, lon), hit(query, lat + 0.001, lon + 0.001)],
            None => Vec::new(),
        })
    }
}

pub fn hit(query: &str, latitude: f64, longitude: f64) -> SearchHit {
    SearchHit {
        searchval: query.to_string(),
        blk_no: query.split(' ').next().unwrap_or_default().to_string(),
        road_name: query.splitn(2, ' ').nth(1).unwrap_or_default().to_string(),
        building: "NIL".to_string(),
        address: format!("{query} SINGAPORE"),
        postal: "000000".to_string(),
        x: "29000.1".to_string(),
        y: "38000.2".to_string(),
        latitude: latitude.to_string(),
        longitude: longitude.to_string(),
    }
}

/// Fast, retry-light settings so failures resolve quickly
pub fn fast_config() -> GeocodingConfig {
    GeocodingConfig {
        request_delay_ms: 0,
        requests_per_minute: 60_000,
        base_delay_ms: 1,
        max_attempts: 2,
        workers: 3,
        checkpoint_interval: 0,
        ..GeocodingConfig::default()
    }
}

pub fn store(dir: &Path) -> ArtifactStore {
    ArtifactStore::new(&PipelineConfig::for_data_dir(dir))
}

pub fn orchestrator(dir: &Path, backend: Arc<FakeBackend>) -> BatchGeocodingOrchestrator {
    let config = fast_config();
    let client = GeocodingClient::new(backend, &config, None);
    BatchGeocodingOrchestrator::new(client, store(dir), BatchOptions::from_config(&config))
}

pub fn records(addresses: &[&str]) -> Vec<AddressRecord> {
    addresses
        .iter()
        .map(|a| AddressRecord {
            address: a.to_string(),
            property_type: PropertyType::Hdb,
            source_count: 1,
        })
        .collect()
}

pub fn geocoded(address: &str) -> GeocodedAddress {
    GeocodedAddress {
        address: address.to_string(),
        search_result: 0,
        searchval: address.to_string(),
        blk_no: String::new(),
        road_name: String::new(),
        building: "NIL".to_string(),
        full_address: format!("{address} SINGAPORE"),
        postal: "000000".to_string(),
        x: None,
        y: None,
        latitude: 1.35,
        longitude: 103.85,
    }
}

/// Seed the full geocoded artifact as if a previous run had produced it
pub fn seed_prior(dir: &Path, addresses: &[&str]) {
    let rows: Vec<GeocodedAddress> = addresses.iter().map(|a| geocoded(a)).collect();
    store(dir)
        .save(&rows, &ArtifactNames::default().full, SaveOptions::new().source("seed"))
        .unwrap();
}

pub fn distinct_addresses(rows: &[GeocodedAddress]) -> Vec<String> {
    let mut addresses: Vec<String> = rows
        .iter()
        .map(|r| r.address.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    addresses.sort();
    addresses
}
