//! Pipeline configuration
//!
//! A single [`PipelineConfig`] is built once at process start and passed by
//! reference into the artifact store, the cache and the geocoding client.
//!
//! Resolution order for every setting:
//! 1. Command-line argument (config file path only)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default

use crate::store::Codec;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "SGRE_CONFIG";
/// Environment variable overriding the data root
pub const ENV_DATA_DIR: &str = "SGRE_DATA_DIR";
/// Environment variable enabling/disabling the response cache
pub const ENV_CACHE_ENABLED: &str = "SGRE_CACHE_ENABLED";
/// OneMap account email
pub const ENV_ONEMAP_EMAIL: &str = "ONEMAP_EMAIL";
/// OneMap account password
pub const ENV_ONEMAP_PASSWORD: &str = "ONEMAP_PASSWORD";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root folder for artifacts, the ledger and (by default) the cache
    pub data_dir: PathBuf,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub geocoding: GeocodingConfig,
    pub logging: LoggingConfig,
}

/// Artifact store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Ledger file name, relative to `data_dir`
    pub ledger_file: String,
    /// Default parquet codec when `save` does not name one
    pub compression: Codec,
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache directory; `<data_dir>/cache` when unset
    pub dir: Option<PathBuf>,
    /// Expiry applied when callers do not pass their own
    pub default_duration_hours: f64,
}

/// Geocoding API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Use the worker pool rather than one request at a time
    pub parallel: bool,
    /// Worker count for the parallel path
    pub workers: usize,
    /// Delay each worker sleeps after every request
    pub request_delay_ms: u64,
    /// Shared quota across all workers
    pub requests_per_minute: u32,
    /// Per-request HTTP timeout
    pub timeout_secs: u64,
    /// Attempts per address, including the first
    pub max_attempts: u32,
    /// First backoff delay; doubles on each retry
    pub base_delay_ms: u64,
    /// Completed addresses between checkpoint saves
    pub checkpoint_interval: usize,
    /// How long cached search responses stay valid
    pub cache_duration_hours: f64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            geocoding: GeocodingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_file: "metadata.json".to_string(),
            compression: Codec::Snappy,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            default_duration_hours: 24.0,
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.onemap.gov.sg".to_string(),
            email: None,
            password: None,
            parallel: true,
            workers: 5,
            // 5 workers x 1.2s keeps the aggregate near OneMap's 250 req/min
            request_delay_ms: 1200,
            requests_per_minute: 250,
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 500,
            checkpoint_interval: 500,
            cache_duration_hours: 24.0 * 30.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults rooted at `data_dir` (used by tests and one-off tools)
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Resolve configuration from CLI path, environment and TOML file
    ///
    /// A missing config file is not an error: defaults are used and a warning
    /// is logged. A config file that exists but cannot be parsed is an error.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration");
                Self::from_toml_file(&path)?
            }
            Some(path) => {
                if cli_path.is_some() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => {
                warn!("No config file location available, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file into a config (no env overrides)
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Apply environment variable overrides on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(value) = std::env::var(ENV_CACHE_ENABLED) {
            self.cache.enabled = parse_bool(&value).ok_or_else(|| {
                Error::Config(format!("{} must be true/false, got '{}'", ENV_CACHE_ENABLED, value))
            })?;
        }

        if let Ok(email) = std::env::var(ENV_ONEMAP_EMAIL) {
            if !email.trim().is_empty() {
                self.geocoding.email = Some(email);
            }
        }

        if let Ok(password) = std::env::var(ENV_ONEMAP_PASSWORD) {
            if !password.trim().is_empty() {
                self.geocoding.password = Some(password);
            }
        }

        Ok(())
    }

    /// Reject values that would stall or overload the pipeline
    pub fn validate(&self) -> Result<()> {
        let g = &self.geocoding;
        if g.workers == 0 {
            return Err(Error::Config("geocoding.workers must be at least 1".to_string()));
        }
        if g.requests_per_minute == 0 {
            return Err(Error::Config(
                "geocoding.requests_per_minute must be at least 1".to_string(),
            ));
        }
        if g.max_attempts == 0 {
            return Err(Error::Config("geocoding.max_attempts must be at least 1".to_string()));
        }
        if g.checkpoint_interval == 0 {
            return Err(Error::Config(
                "geocoding.checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.cache.default_duration_hours < 0.0 || g.cache_duration_hours < 0.0 {
            return Err(Error::Config("cache durations must not be negative".to_string()));
        }
        Ok(())
    }

    /// Absolute path of the ledger file
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.ledger_file)
    }

    /// Directory holding cache entries
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cache"))
    }
}

/// Pick the config file location: CLI argument, then env, then platform default
fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("sgre").join("config.toml"))
}

/// OS-dependent default data root
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sgre"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
