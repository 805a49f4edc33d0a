//! Artifact store: typed tabular datasets on disk, tracked by a JSON ledger
//!
//! The ledger is the single source of truth for "does dataset X exist and how
//! many rows does it have". Callers address datasets by name only; the
//! on-disk path is derived from the name at save time and recorded in the
//! ledger, which `load` trusts over any filesystem probe.
//!
//! Checksums are opt-in at save time and only re-checked by
//! [`ArtifactStore::verify_metadata`], so loading a large artifact never pays
//! for hashing it.
//!
//! The ledger is read and rewritten on every save. One writer at a time is
//! assumed (one pipeline process).

mod ledger;
mod parquet_io;
pub mod tabular;

pub use ledger::{ArtifactMeta, Codec, Ledger, SaveMode};
pub use tabular::Tabular;

use crate::config::PipelineConfig;
use crate::{time, Error, Result};
use arrow::record_batch::RecordBatch;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options for [`ArtifactStore::save`]
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Lineage description recorded in the ledger
    pub source: Option<String>,
    /// Explicit version; today's date when unset
    pub version: Option<String>,
    pub mode: SaveMode,
    /// Write a partitioned directory keyed by these columns
    pub partition_cols: Option<Vec<String>>,
    /// Codec override; the configured default when unset
    pub compression: Option<Codec>,
    /// Compute and record a SHA-256 of the written content
    pub calculate_checksum: bool,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn mode(mut self, mode: SaveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn partition_by<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_cols = Some(cols.into_iter().map(Into::into).collect());
        self
    }

    pub fn compression(mut self, codec: Codec) -> Self {
        self.compression = Some(codec);
        self
    }

    pub fn with_checksum(mut self) -> Self {
        self.calculate_checksum = true;
        self
    }
}

/// Outcome of checking one ledger entry against the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Missing { path: String },
    ChecksumMismatch { expected: String, actual: String },
    Unreadable(String),
}

/// Per-entry result of [`ArtifactStore::verify_metadata`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCheck {
    pub name: String,
    pub status: CheckStatus,
}

/// Integrity audit of the whole ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub passed: bool,
    pub entries: Vec<EntryCheck>,
}

impl VerificationReport {
    /// Entries that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &EntryCheck> {
        self.entries.iter().filter(|e| e.status != CheckStatus::Ok)
    }
}

/// Lineage-tracked parquet storage rooted at the configured data directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
    ledger_path: PathBuf,
    default_codec: Codec,
}

impl ArtifactStore {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            ledger_path: config.ledger_path(),
            default_codec: config.storage.compression,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Save rows under `name`, replacing or extending any prior artifact
    ///
    /// # Errors
    /// - `InvalidInput` if `rows` is empty, the name is malformed, a partition
    ///   column does not exist, or an append meets a different schema
    /// - `NotFound` if appending to an artifact whose file has been deleted
    /// - `Internal` for write failures
    pub fn save<T: Tabular>(
        &self,
        rows: &[T],
        name: &str,
        options: SaveOptions,
    ) -> Result<ArtifactMeta> {
        if rows.is_empty() {
            return Err(Error::InvalidInput(format!(
                "refusing to save empty dataset '{}'",
                name
            )));
        }

        let mut ledger = Ledger::read(&self.ledger_path)?;
        let previous = ledger.datasets.get(name).cloned();

        let partition_cols = options
            .partition_cols
            .clone()
            .filter(|cols| !cols.is_empty());
        let rel_path = artifact_rel_path(name, partition_cols.is_some())?;
        let abs_path = self.data_dir.join(&rel_path);
        let codec = options.compression.unwrap_or(self.default_codec);

        let schema = T::schema();
        let new_batch = T::to_batch(rows)?;
        let mut batches: Vec<RecordBatch> = Vec::new();

        if options.mode == SaveMode::Append {
            if let Some(prev) = &previous {
                let prior = self.read_entry(name, prev)?;
                let prior_rows: usize = prior.iter().map(|b| b.num_rows()).sum();
                for batch in prior {
                    if !same_columns(&batch, &new_batch) {
                        return Err(Error::InvalidInput(format!(
                            "cannot append to '{}': schema differs from stored artifact",
                            name
                        )));
                    }
                    batches.push(RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?);
                }
                info!(
                    dataset = name,
                    existing_rows = prior_rows,
                    appended_rows = rows.len(),
                    total_rows = prior_rows + rows.len(),
                    "Appending to artifact"
                );
            }
        }
        batches.push(new_batch);

        let total_rows: usize = batches.iter().map(|b| b.num_rows()).sum();

        match &partition_cols {
            Some(cols) => {
                let combined = arrow::compute::concat_batches(&schema, &batches)?;
                parquet_io::write_partitioned(&abs_path, schema.clone(), &combined, cols, codec)?;
            }
            None => parquet_io::write_file(&abs_path, schema.clone(), &batches, codec)?,
        }

        // A layout change (file <-> partitioned) leaves the old copy behind
        if let Some(prev) = &previous {
            if prev.path != rel_path {
                remove_path(&self.data_dir.join(&prev.path))?;
            }
        }

        let checksum = if options.calculate_checksum {
            Some(parquet_io::checksum(&abs_path)?)
        } else {
            None
        };

        let version = options.version.clone().unwrap_or_else(time::today_version);
        if let Some(prev) = &previous {
            if prev.version != version {
                warn!(
                    dataset = name,
                    old_version = %prev.version,
                    new_version = %version,
                    "Replacing artifact recorded under a different version"
                );
            }
        }

        let meta = ArtifactMeta {
            path: rel_path,
            version,
            rows: total_rows as u64,
            created: time::now(),
            source: options.source.clone(),
            mode: options.mode,
            compression: codec,
            checksum,
            partition_cols,
        };

        ledger.datasets.insert(name.to_string(), meta.clone());
        ledger.write(&self.ledger_path)?;

        info!(
            dataset = name,
            rows = meta.rows,
            path = %meta.path,
            mode = %meta.mode,
            compression = %meta.compression,
            "Saved artifact"
        );

        Ok(meta)
    }

    /// Load every row of `name`, optionally pinned to a version
    ///
    /// # Errors
    /// - `InvalidInput` if the ledger has no such dataset or the recorded
    ///   version differs from `version`
    /// - `NotFound` if the ledger path no longer exists on disk
    /// - `Internal` wrapping any read or decode failure
    pub fn load<T: Tabular>(&self, name: &str, version: Option<&str>) -> Result<Vec<T>> {
        let ledger = Ledger::read(&self.ledger_path)?;
        let entry = ledger.datasets.get(name).ok_or_else(|| {
            Error::InvalidInput(format!("dataset '{}' is not in the ledger", name))
        })?;

        if let Some(wanted) = version {
            if entry.version != wanted {
                return Err(Error::InvalidInput(format!(
                    "dataset '{}' is at version {}, not {}",
                    name, entry.version, wanted
                )));
            }
        }

        let batches = self.read_entry(name, entry)?;
        let mut rows = Vec::with_capacity(entry.rows as usize);
        for batch in &batches {
            let decoded = T::from_batch(batch)
                .map_err(|e| Error::internal(format!("Failed to decode artifact '{}'", name), e))?;
            rows.extend(decoded);
        }

        info!(dataset = name, rows = rows.len(), version = %entry.version, "Loaded artifact");
        Ok(rows)
    }

    fn read_entry(&self, name: &str, entry: &ArtifactMeta) -> Result<Vec<RecordBatch>> {
        let path = self.data_dir.join(&entry.path);
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "artifact '{}' is recorded at {} but the file is gone; regenerate the stage that produces it",
                name,
                path.display()
            )));
        }

        parquet_io::read_path(&path).map_err(|e| {
            Error::internal(
                format!("Failed to read artifact '{}' from {}", name, path.display()),
                e,
            )
        })
    }

    /// The full ledger (name → metadata)
    pub fn list_datasets(&self) -> Result<BTreeMap<String, ArtifactMeta>> {
        Ok(Ledger::read(&self.ledger_path)?.datasets)
    }

    /// Ledger entry for one dataset
    pub fn info(&self, name: &str) -> Result<Option<ArtifactMeta>> {
        Ok(Ledger::read(&self.ledger_path)?.datasets.remove(name))
    }

    /// Whether the ledger knows `name` (no filesystem probe)
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(Ledger::read(&self.ledger_path)?.datasets.contains_key(name))
    }

    /// Explicitly clear a dataset: delete its file(s) and its ledger entry
    ///
    /// Returns `false` if the ledger had no such dataset.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut ledger = Ledger::read(&self.ledger_path)?;
        let Some(entry) = ledger.datasets.remove(name) else {
            return Ok(false);
        };

        remove_path(&self.data_dir.join(&entry.path))?;
        ledger.write(&self.ledger_path)?;

        info!(dataset = name, path = %entry.path, "Removed artifact");
        Ok(true)
    }

    /// Check every ledger entry against the filesystem
    ///
    /// An entry fails if its file is missing or, when a checksum was recorded,
    /// the content no longer hashes to it. Entries without a checksum only need
    /// to exist.
    pub fn verify_metadata(&self) -> Result<VerificationReport> {
        let ledger = Ledger::read(&self.ledger_path)?;
        let mut entries = Vec::with_capacity(ledger.datasets.len());

        for (name, meta) in &ledger.datasets {
            let path = self.data_dir.join(&meta.path);
            let status = if !path.exists() {
                CheckStatus::Missing {
                    path: meta.path.clone(),
                }
            } else if let Some(expected) = &meta.checksum {
                match parquet_io::checksum(&path) {
                    Ok(actual) if &actual == expected => CheckStatus::Ok,
                    Ok(actual) => CheckStatus::ChecksumMismatch {
                        expected: expected.clone(),
                        actual,
                    },
                    Err(e) => CheckStatus::Unreadable(e.to_string()),
                }
            } else {
                CheckStatus::Ok
            };

            match &status {
                CheckStatus::Ok => debug!(dataset = %name, "Artifact verified"),
                CheckStatus::Missing { path } => {
                    warn!(dataset = %name, path = %path, "Artifact file missing")
                }
                CheckStatus::ChecksumMismatch { expected, actual } => warn!(
                    dataset = %name,
                    expected = %expected,
                    actual = %actual,
                    "Artifact checksum mismatch"
                ),
                CheckStatus::Unreadable(reason) => {
                    warn!(dataset = %name, reason = %reason, "Artifact unreadable")
                }
            }

            entries.push(EntryCheck {
                name: name.clone(),
                status,
            });
        }

        let passed = entries.iter().all(|e| e.status == CheckStatus::Ok);
        info!(
            datasets = entries.len(),
            failed = entries.iter().filter(|e| e.status != CheckStatus::Ok).count(),
            passed,
            "Ledger verification complete"
        );

        Ok(VerificationReport { passed, entries })
    }
}

/// Map a dataset name to its relative path
///
/// `L1_geocoded_full` → `L1/geocoded_full.parquet`; names without a stage
/// prefix land at the data root. Partitioned datasets get a directory.
pub fn artifact_rel_path(name: &str, partitioned: bool) -> Result<String> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(Error::InvalidInput(format!("invalid dataset name '{}'", name)));
    }

    let base = match name.split_once('_') {
        Some((stage, rest)) if is_stage_prefix(stage) && !rest.is_empty() => {
            format!("{}/{}", stage, rest)
        }
        _ => name.to_string(),
    };

    Ok(if partitioned {
        base
    } else {
        format!("{}.parquet", base)
    })
}

fn is_stage_prefix(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('L') && {
        let digits = chars.as_str();
        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
    }
}

fn same_columns(a: &RecordBatch, b: &RecordBatch) -> bool {
    let a = a.schema();
    let b = b.schema();
    a.fields().len() == b.fields().len()
        && a
            .fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
