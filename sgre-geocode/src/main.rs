//! sgre-geocode - L1 geocoding stage
//!
//! Subcommands:
//! - `ingest`: raw CSVs → L0 artifacts
//! - `geocode`: L0 artifacts → unique addresses → geocoded L1 artifacts
//! - `datasets` / `verify`: inspect and check the artifact ledger
//! - `cache-stats` / `cache-clear`: manage the response cache

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sgre_common::{ArtifactStore, CacheManager, PipelineConfig, Tabular};
use sgre_geocode::ingest::{self, CONDO_DATASET, EC_DATASET, HDB_DATASET};
use sgre_geocode::models::{HdbTransaction, PrivateTransaction, PropertyType};
use sgre_geocode::{
    AddressExtractor, BatchGeocodingOrchestrator, BatchOptions, GeocodingClient, PropertyTypePolicy,
    UNIQUE_ADDRESSES_DATASET,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

const DEFAULT_LOG_LEVEL: &str = "info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Command-line arguments for sgre-geocode
#[derive(Parser, Debug)]
#[command(name = "sgre-geocode")]
#[command(about = "Geocoding stage for the Singapore real-estate pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file (falls back to SGRE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data root (overrides config and SGRE_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read raw CSV exports into L0 artifacts
    Ingest {
        /// HDB resale prices CSV
        #[arg(long)]
        hdb: Option<PathBuf>,
        /// URA private residential transactions CSV
        #[arg(long)]
        private: Option<PathBuf>,
    },
    /// Geocode addresses not yet in the L1 artifacts
    Geocode {
        /// One request at a time instead of the worker pool
        #[arg(long)]
        sequential: bool,
        /// Worker count for the parallel path
        #[arg(long)]
        workers: Option<usize>,
        /// Property type precedence, e.g. "hdb,condo,ec" (default: first seen)
        #[arg(long, value_delimiter = ',')]
        priority: Vec<String>,
    },
    /// List datasets recorded in the ledger
    Datasets,
    /// Check every ledger entry against the files on disk
    Verify,
    /// Show response cache statistics
    CacheStats,
    /// Delete cache entries
    CacheClear {
        /// Only clear the entry for this identifier
        #[arg(long)]
        identifier: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_filter = init_tracing();

    let mut config = PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    config.validate().context("Invalid configuration")?;

    apply_log_level(log_filter.as_ref(), &config.logging.level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "Starting sgre-geocode"
    );

    match args.command {
        Command::Ingest { hdb, private } => run_ingest(&config, hdb, private),
        Command::Geocode {
            sequential,
            workers,
            priority,
        } => run_geocode(&config, sequential, workers, &priority).await,
        Command::Datasets => list_datasets(&config),
        Command::Verify => verify(&config),
        Command::CacheStats => cache_stats(&config),
        Command::CacheClear { identifier } => cache_clear(&config, identifier.as_deref()),
    }
}

/// Start logging before the config is read
///
/// Returns a handle for swapping in the configured level, or `None` when
/// `RUST_LOG` is set and takes precedence.
fn init_tracing() -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let env_set = from_env.is_some();
    let (filter, handle) = reload::Layer::new(
        from_env.unwrap_or_else(|| EnvFilter::new(filter_directive(DEFAULT_LOG_LEVEL))),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    (!env_set).then_some(handle)
}

fn apply_log_level(handle: Option<&FilterHandle>, level: &str) {
    let Some(handle) = handle else { return };
    if let Err(e) = handle.reload(EnvFilter::new(filter_directive(level))) {
        warn!(level, error = %e, "Failed to apply configured log level");
    }
}

/// Bare levels apply to this workspace's crates; full directives pass through
fn filter_directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("sgre_geocode={level},sgre_common={level}")
    }
}

fn run_ingest(config: &PipelineConfig, hdb: Option<PathBuf>, private: Option<PathBuf>) -> Result<()> {
    if hdb.is_none() && private.is_none() {
        bail!("Nothing to ingest: pass --hdb and/or --private");
    }

    let store = ArtifactStore::new(config);
    let summary = ingest::ingest(&store, hdb.as_deref(), private.as_deref()).context("Ingest failed")?;

    println!(
        "Ingested {} HDB, {} condo, {} EC rows ({} skipped)",
        summary.hdb, summary.condo, summary.ec, summary.skipped
    );
    Ok(())
}

fn load_or_empty<T: Tabular>(store: &ArtifactStore, name: &str) -> Result<Vec<T>> {
    if !store.exists(name)? {
        warn!(dataset = name, "Input dataset not found; treating as empty");
        return Ok(Vec::new());
    }
    store
        .load(name, None)
        .with_context(|| format!("Failed to load {name}"))
}

fn parse_policy(priority: &[String]) -> Result<PropertyTypePolicy> {
    if priority.is_empty() {
        return Ok(PropertyTypePolicy::FirstSeen);
    }
    let order = priority
        .iter()
        .map(|p| p.parse::<PropertyType>())
        .collect::<sgre_common::Result<Vec<_>>>()
        .context("Invalid --priority")?;
    Ok(PropertyTypePolicy::Priority(order))
}

async fn run_geocode(
    config: &PipelineConfig,
    sequential: bool,
    workers: Option<usize>,
    priority: &[String],
) -> Result<()> {
    let store = ArtifactStore::new(config);

    let ec: Vec<PrivateTransaction> = load_or_empty(&store, EC_DATASET)?;
    let condo: Vec<PrivateTransaction> = load_or_empty(&store, CONDO_DATASET)?;
    let hdb: Vec<HdbTransaction> = load_or_empty(&store, HDB_DATASET)?;
    if ec.is_empty() && condo.is_empty() && hdb.is_empty() {
        bail!("No L0 transactions found; run `sgre-geocode ingest` first");
    }

    let extractor = AddressExtractor::new(parse_policy(priority)?);
    let addresses = extractor.extract(&ec, &condo, &hdb);
    if addresses.is_empty() {
        bail!("No addresses could be built from the L0 transactions");
    }
    store
        .save(
            &addresses,
            UNIQUE_ADDRESSES_DATASET,
            sgre_common::SaveOptions::new().source("L0 transaction tables"),
        )
        .context("Failed to save unique addresses")?;

    let mut options = BatchOptions::from_config(&config.geocoding);
    if sequential {
        options.parallel = false;
    }
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }

    let client = GeocodingClient::from_config(config).context("Failed to create geocoding client")?;
    let orchestrator = BatchGeocodingOrchestrator::new(client, store, options);
    let output = orchestrator.run(&addresses).await.context("Geocoding stage failed")?;

    let report = &output.report;
    if output.degraded {
        warn!("Geocoding service unavailable; prior results returned unchanged");
    }
    println!(
        "requested={} already_geocoded={} attempted={} geocoded={} failed={} best_matches={} elapsed={:.1}s",
        report.requested,
        report.already_geocoded,
        report.attempted,
        report.geocoded,
        report.failed,
        report.filtered,
        report.elapsed.as_secs_f64()
    );
    if report.failed > 0 {
        println!("Failed addresses written to {}", orchestrator.failed_log_path().display());
    }
    Ok(())
}

fn list_datasets(config: &PipelineConfig) -> Result<()> {
    let store = ArtifactStore::new(config);
    let datasets = store.list_datasets().context("Failed to read ledger")?;

    if datasets.is_empty() {
        println!("No datasets recorded in {}", config.ledger_path().display());
        return Ok(());
    }

    for (name, meta) in &datasets {
        println!(
            "{:<32} {:>10} rows  v{}  {}  {}",
            name,
            meta.rows,
            meta.version,
            meta.created.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            meta.path
        );
    }
    Ok(())
}

fn verify(config: &PipelineConfig) -> Result<()> {
    let store = ArtifactStore::new(config);
    let report = store.verify_metadata().context("Failed to verify ledger")?;

    for entry in &report.entries {
        println!("{:<32} {:?}", entry.name, entry.status);
    }

    if !report.passed {
        bail!("{} dataset(s) failed verification", report.failures().count());
    }
    println!("All {} datasets verified", report.entries.len());
    Ok(())
}

fn cache_stats(config: &PipelineConfig) -> Result<()> {
    let stats = CacheManager::new(config)
        .get_stats()
        .context("Failed to read cache directory")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn cache_clear(config: &PipelineConfig, identifier: Option<&str>) -> Result<()> {
    let removed = CacheManager::new(config)
        .clear(identifier)
        .context("Failed to clear cache")?;
    println!("Removed {removed} cache entries");
    Ok(())
}
