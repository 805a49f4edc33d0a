//! JSON ledger describing every stored artifact
//!
//! On-disk shape:
//!
//! ```json
//! {
//!   "datasets": {
//!     "L1_geocoded_full": {
//!       "path": "L1/geocoded_full.parquet",
//!       "version": "2024-05-01",
//!       "rows": 1234,
//!       "created": "2024-05-01T10:00:00Z",
//!       "source": "OneMap search",
//!       "mode": "overwrite",
//!       "compression": "snappy"
//!     }
//!   },
//!   "last_updated": "2024-05-01T10:00:00Z"
//! }
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Save mode for an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    #[default]
    Overwrite,
    Append,
}

impl FromStr for SaveMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(SaveMode::Overwrite),
            "append" => Ok(SaveMode::Append),
            other => Err(Error::InvalidInput(format!(
                "mode must be 'overwrite' or 'append', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::Overwrite => f.write_str("overwrite"),
            SaveMode::Append => f.write_str("append"),
        }
    }
}

/// Parquet compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Snappy,
    Zstd,
    Gzip,
    Lz4,
    Brotli,
    None,
}

impl Codec {
    pub(crate) fn to_parquet(self) -> Compression {
        match self {
            Codec::Snappy => Compression::SNAPPY,
            Codec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Codec::Gzip => Compression::GZIP(GzipLevel::default()),
            Codec::Lz4 => Compression::LZ4_RAW,
            Codec::Brotli => Compression::BROTLI(BrotliLevel::default()),
            Codec::None => Compression::UNCOMPRESSED,
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Codec::Snappy),
            "zstd" => Ok(Codec::Zstd),
            "gzip" => Ok(Codec::Gzip),
            "lz4" => Ok(Codec::Lz4),
            "brotli" => Ok(Codec::Brotli),
            "none" | "uncompressed" => Ok(Codec::None),
            other => Err(Error::InvalidInput(format!("unknown compression codec '{}'", other))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::Snappy => "snappy",
            Codec::Zstd => "zstd",
            Codec::Gzip => "gzip",
            Codec::Lz4 => "lz4",
            Codec::Brotli => "brotli",
            Codec::None => "none",
        };
        f.write_str(name)
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Path relative to the data root (file, or directory when partitioned)
    pub path: String,
    pub version: String,
    pub rows: u64,
    pub created: DateTime<Utc>,
    /// Free-text lineage: what produced this artifact
    pub source: Option<String>,
    pub mode: SaveMode,
    pub compression: Codec,
    /// SHA-256 hex of the stored content, only when requested at save time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_cols: Option<Vec<String>>,
}

/// The whole ledger file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub datasets: BTreeMap<String, ArtifactMeta>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Ledger {
    /// Read the ledger; a missing file is an empty ledger
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read(path)
            .map_err(|e| Error::internal(format!("Read ledger {}", path.display()), e))?;
        serde_json::from_slice(&content)
            .map_err(|e| Error::internal(format!("Parse ledger {}", path.display()), e))
    }

    /// Rewrite the whole ledger through a temp file and rename
    pub fn write(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Some(crate::time::now());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, content)
            .map_err(|e| Error::internal(format!("Write ledger {}", tmp.display()), e))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::internal(format!("Replace ledger {}", path.display()), e))?;
        Ok(())
    }
}
