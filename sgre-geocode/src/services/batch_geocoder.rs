//! Incremental batch geocoding
//!
//! Only addresses missing from the prior full artifact are sent to the
//! geocoding service. New rows are merged with the prior rows and both the
//! full candidate list and the best-match table are rewritten. A checkpoint
//! left behind by an interrupted run is folded into the prior rows first, so
//! a crashed batch resumes where it stopped.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{AddressLocation, AddressRecord, GeocodedAddress, PropertyType};
use crate::services::geocoding_client::{BatchOptions, GeocodingClient};
use sgre_common::{ArtifactStore, SaveOptions};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const FAILED_LOG_FILE: &str = "failed_geocoding.txt";

/// Artifact names used by the stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    /// Every ranked candidate for every geocoded address
    pub full: String,
    /// Rank-0 candidates tagged with property type
    pub best_match: String,
    /// Partial rows of an in-flight batch
    pub checkpoint: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            full: "L1_geocoded_addresses_full".to_string(),
            best_match: "L1_geocoded_addresses".to_string(),
            checkpoint: BatchOptions::DEFAULT_CHECKPOINT_NAME.to_string(),
        }
    }
}

/// Counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeocodingReport {
    /// Unique addresses asked for
    pub requested: usize,
    /// Of those, already present in prior data
    pub already_geocoded: usize,
    /// Sent to the geocoding service this run
    pub attempted: usize,
    /// Attempted addresses that produced at least one candidate
    pub geocoded: usize,
    pub failed: usize,
    /// Rows in the best-match table
    pub filtered: usize,
    pub elapsed: Duration,
}

/// Everything the stage produced
#[derive(Debug, Clone, Default)]
pub struct GeocodingOutput {
    /// Merged full candidate rows (prior + new)
    pub rows: Vec<GeocodedAddress>,
    /// Best match per requested address
    pub locations: Vec<AddressLocation>,
    pub failed: Vec<String>,
    pub report: GeocodingReport,
    /// Authentication failed and prior data was returned unchanged
    pub degraded: bool,
}

pub struct BatchGeocodingOrchestrator {
    client: GeocodingClient,
    store: ArtifactStore,
    options: BatchOptions,
    names: ArtifactNames,
    failed_log: PathBuf,
}

impl BatchGeocodingOrchestrator {
    pub fn new(client: GeocodingClient, store: ArtifactStore, options: BatchOptions) -> Self {
        let names = ArtifactNames {
            checkpoint: options.checkpoint_name.clone(),
            ..ArtifactNames::default()
        };
        let failed_log = store.data_dir().join(FAILED_LOG_FILE);
        Self {
            client,
            store,
            options,
            names,
            failed_log,
        }
    }

    pub fn with_names(mut self, names: ArtifactNames) -> Self {
        self.options.checkpoint_name = names.checkpoint.clone();
        self.names = names;
        self
    }

    pub fn with_failed_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.failed_log = path.into();
        self
    }

    pub fn names(&self) -> &ArtifactNames {
        &self.names
    }

    pub fn failed_log_path(&self) -> &Path {
        &self.failed_log
    }

    /// Geocode whatever in `addresses` is not geocoded yet and persist results
    ///
    /// When nothing is new, no service call is made and the full artifact is
    /// left alone; the best-match table is only rewritten if this run's
    /// property types tag it differently. A failed-address list from an
    /// earlier run is removed once a run finishes with no failures.
    ///
    /// # Errors
    /// - authentication failure when there is no prior data to fall back on
    /// - storage failures while reading prior data or persisting results
    pub async fn run(&self, addresses: &[AddressRecord]) -> PipelineResult<GeocodingOutput> {
        let started = Instant::now();
        let property_types = property_type_index(addresses);
        let requested: Vec<String> = unique_addresses(addresses);

        let prior = self.load_prior()?;
        let resumed = self.load_checkpoint(&prior)?;
        let resumed_from_checkpoint = !resumed.is_empty();

        let mut merged = prior;
        merged.extend(resumed);

        let already: HashSet<&str> = merged.iter().map(|r| r.address.as_str()).collect();
        let new_addresses: Vec<String> = requested
            .iter()
            .filter(|a| !already.contains(a.as_str()))
            .cloned()
            .collect();
        let already_geocoded = requested.len() - new_addresses.len();

        tracing::info!(
            requested = requested.len(),
            already_geocoded,
            new = new_addresses.len(),
            resumed_from_checkpoint,
            "Planned geocoding run"
        );

        let mut report = GeocodingReport {
            requested: requested.len(),
            already_geocoded,
            ..GeocodingReport::default()
        };

        if new_addresses.is_empty() && !resumed_from_checkpoint {
            let locations = best_matches(&merged, &property_types);
            report.filtered = locations.len();
            report.elapsed = started.elapsed();
            tracing::info!(filtered = report.filtered, "All addresses already geocoded; skipping service calls");
            self.refresh_best_matches(&locations)?;
            clear_failed_log(&self.failed_log)?;
            return Ok(GeocodingOutput {
                rows: merged,
                locations,
                failed: Vec::new(),
                report,
                degraded: false,
            });
        }

        let mut failed = Vec::new();
        if !new_addresses.is_empty() {
            if let Err(e) = self.client.authenticate().await {
                if merged.is_empty() {
                    tracing::error!(error = %e, "Authentication failed and no prior geocoded data exists");
                    return Err(PipelineError::Geocode(e));
                }
                return self.degraded(merged, new_addresses, &property_types, report, started, &e);
            }

            report.attempted = new_addresses.len();
            let batch = self
                .client
                .geocode_many(&new_addresses, &self.options, Some(&self.store))
                .await;
            report.geocoded = batch.geocoded_count();
            report.failed = batch.failed.len();
            failed = batch.failed;
            merged.extend(batch.rows);
        }

        let locations = best_matches(&merged, &property_types);
        report.filtered = locations.len();
        self.persist(&merged, &locations)?;

        if failed.is_empty() {
            clear_failed_log(&self.failed_log)?;
        } else {
            write_failed_log(&self.failed_log, &failed)?;
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            requested = report.requested,
            already_geocoded = report.already_geocoded,
            attempted = report.attempted,
            geocoded = report.geocoded,
            failed = report.failed,
            filtered = report.filtered,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Geocoding stage complete"
        );

        Ok(GeocodingOutput {
            rows: merged,
            locations,
            failed,
            report,
            degraded: false,
        })
    }

    fn degraded(
        &self,
        prior: Vec<GeocodedAddress>,
        new_addresses: Vec<String>,
        property_types: &HashMap<&str, PropertyType>,
        mut report: GeocodingReport,
        started: Instant,
        cause: &crate::error::GeocodeError,
    ) -> PipelineResult<GeocodingOutput> {
        tracing::warn!(
            error = %cause,
            prior_rows = prior.len(),
            skipped = new_addresses.len(),
            "Authentication failed; returning prior geocoded data"
        );

        let locations = best_matches(&prior, property_types);
        write_failed_log(&self.failed_log, &new_addresses)?;

        report.failed = new_addresses.len();
        report.filtered = locations.len();
        report.elapsed = started.elapsed();

        Ok(GeocodingOutput {
            rows: prior,
            locations,
            failed: new_addresses,
            report,
            degraded: true,
        })
    }

    fn load_prior(&self) -> PipelineResult<Vec<GeocodedAddress>> {
        if !self.store.exists(&self.names.full)? {
            tracing::info!(dataset = %self.names.full, "No prior geocoded data");
            return Ok(Vec::new());
        }
        let rows: Vec<GeocodedAddress> = self.store.load(&self.names.full, None)?;
        tracing::info!(dataset = %self.names.full, rows = rows.len(), "Loaded prior geocoded data");
        Ok(rows)
    }

    /// Checkpoint rows for addresses not already in `prior`
    fn load_checkpoint(&self, prior: &[GeocodedAddress]) -> PipelineResult<Vec<GeocodedAddress>> {
        if !self.store.exists(&self.names.checkpoint)? {
            return Ok(Vec::new());
        }

        let rows: Vec<GeocodedAddress> = match self.store.load(&self.names.checkpoint, None) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(dataset = %self.names.checkpoint, error = %e, "Ignoring unreadable checkpoint");
                return Ok(Vec::new());
            }
        };

        let known: HashSet<&str> = prior.iter().map(|r| r.address.as_str()).collect();
        let fresh: Vec<GeocodedAddress> = rows
            .into_iter()
            .filter(|r| !known.contains(r.address.as_str()))
            .collect();

        tracing::info!(dataset = %self.names.checkpoint, rows = fresh.len(), "Resuming from checkpoint");
        Ok(fresh)
    }

    /// Rewrite the best-match table only when it differs from `locations`
    fn refresh_best_matches(&self, locations: &[AddressLocation]) -> PipelineResult<()> {
        if locations.is_empty() {
            return Ok(());
        }
        if self.store.exists(&self.names.best_match)? {
            let current: Vec<AddressLocation> = self.store.load(&self.names.best_match, None)?;
            if current == locations {
                return Ok(());
            }
        }

        let options = SaveOptions::new().source(format!("best matches from {}", self.names.full));
        self.store.save(locations, &self.names.best_match, options)?;
        tracing::info!(
            dataset = %self.names.best_match,
            rows = locations.len(),
            "Rewrote best-match table for current property types"
        );
        Ok(())
    }

    fn persist(&self, merged: &[GeocodedAddress], locations: &[AddressLocation]) -> PipelineResult<()> {
        if merged.is_empty() {
            tracing::warn!("No geocoded rows to persist");
        } else {
            let options = SaveOptions::new().source("OneMap search API");
            self.store.save(merged, &self.names.full, options)?;
        }

        if !locations.is_empty() {
            let options = SaveOptions::new().source(format!("best matches from {}", self.names.full));
            self.store.save(locations, &self.names.best_match, options)?;
        }

        if self.store.remove(&self.names.checkpoint)? {
            tracing::info!(dataset = %self.names.checkpoint, "Removed checkpoint after successful persist");
        }
        Ok(())
    }
}

fn unique_addresses(addresses: &[AddressRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .iter()
        .filter(|r| seen.insert(r.address.as_str()))
        .map(|r| r.address.clone())
        .collect()
}

fn property_type_index(addresses: &[AddressRecord]) -> HashMap<&str, PropertyType> {
    let mut index = HashMap::new();
    for record in addresses {
        index.entry(record.address.as_str()).or_insert(record.property_type);
    }
    index
}

/// Rank-0 rows for addresses with a known property type
pub fn best_matches(
    rows: &[GeocodedAddress],
    property_types: &HashMap<&str, PropertyType>,
) -> Vec<AddressLocation> {
    let mut emitted = HashSet::new();
    rows.iter()
        .filter(|r| r.is_best_match())
        .filter_map(|r| {
            let property_type = *property_types.get(r.address.as_str())?;
            emitted
                .insert(r.address.as_str())
                .then(|| AddressLocation::from_match(r, property_type))
        })
        .collect()
}

/// Write the manual follow-up list: comment header, then one address per line
pub fn write_failed_log(path: &Path, failed: &[String]) -> sgre_common::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)?;
    writeln!(file, "# Addresses that could not be geocoded")?;
    writeln!(file, "# Count: {}", failed.len())?;
    writeln!(file, "# Generated: {}", sgre_common::time::now().to_rfc3339())?;
    for address in failed {
        writeln!(file, "{address}")?;
    }

    tracing::info!(path = %path.display(), count = failed.len(), "Wrote failed address list");
    Ok(())
}

/// Remove a failed-address list left by an earlier run
pub fn clear_failed_log(path: &Path) -> sgre_common::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Removed stale failed address list");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
