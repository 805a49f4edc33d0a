//! Geocoding client
//!
//! Wraps a [`GeocodeBackend`] with the policies every request goes through:
//! - shared token-bucket quota (requests per minute) across all workers
//! - bounded retry with exponential backoff on transient failures
//! - response cache keyed by the query string
//!
//! [`GeocodingClient::geocode_many`] runs either one request at a time or a
//! pool of worker tasks pulling from a bounded queue. Results come back over
//! a channel to a single collector, which also writes periodic checkpoints.

use crate::error::GeocodeError;
use crate::models::GeocodedAddress;
use crate::services::onemap::{GeocodeBackend, OneMapBackend, SearchHit};
use crate::utils::{retry_with_backoff, RetryPolicy};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use sgre_common::config::GeocodingConfig;
use sgre_common::{ArtifactStore, CacheManager, PipelineConfig, SaveOptions};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;

const PROGRESS_LOG_INTERVAL: usize = 50;
const CACHE_KEY_PREFIX: &str = "onemap:search:";

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Result of geocoding one address
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    /// Ranked candidates, best first
    Found(Vec<GeocodedAddress>),
    Failed(GeocodeError),
}

/// How a batch is executed
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub parallel: bool,
    pub workers: usize,
    /// Completed addresses between checkpoint saves (0 disables)
    pub checkpoint_interval: usize,
    pub checkpoint_name: String,
}

impl BatchOptions {
    pub const DEFAULT_CHECKPOINT_NAME: &'static str = "L1_geocoding_checkpoint";

    pub fn from_config(config: &GeocodingConfig) -> Self {
        Self {
            parallel: config.parallel,
            workers: config.workers.max(1),
            checkpoint_interval: config.checkpoint_interval,
            checkpoint_name: Self::DEFAULT_CHECKPOINT_NAME.to_string(),
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&GeocodingConfig::default())
    }
}

/// Rows for every address that matched, plus the addresses that did not
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub rows: Vec<GeocodedAddress>,
    pub failed: Vec<String>,
}

impl BatchResult {
    /// Number of distinct addresses with at least one row
    pub fn geocoded_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.address.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

struct ClientInner {
    backend: Arc<dyn GeocodeBackend>,
    cache: Option<CacheManager>,
    cache_duration_hours: f64,
    retry: RetryPolicy,
    limiter: DirectLimiter,
    request_delay: Duration,
    token: RwLock<Option<String>>,
}

/// Cheap to clone; clones share the token, quota and cache
#[derive(Clone)]
pub struct GeocodingClient {
    inner: Arc<ClientInner>,
}

impl GeocodingClient {
    pub fn new(
        backend: Arc<dyn GeocodeBackend>,
        config: &GeocodingConfig,
        cache: Option<CacheManager>,
    ) -> Self {
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = u32::try_from(config.workers)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN)
            .min(per_minute);

        Self {
            inner: Arc::new(ClientInner {
                backend,
                cache,
                cache_duration_hours: config.cache_duration_hours,
                retry: RetryPolicy::from_config(config),
                limiter: RateLimiter::direct(Quota::per_minute(per_minute).allow_burst(burst)),
                request_delay: Duration::from_millis(config.request_delay_ms),
                token: RwLock::new(None),
            }),
        }
    }

    /// OneMap backend plus the on-disk cache described by `config`
    pub fn from_config(config: &PipelineConfig) -> Result<Self, GeocodeError> {
        let backend = OneMapBackend::new(&config.geocoding)?;
        let cache = CacheManager::new(config);
        Ok(Self::new(Arc::new(backend), &config.geocoding, Some(cache)))
    }

    /// Obtain and store an access token; never retried
    pub async fn authenticate(&self) -> Result<(), GeocodeError> {
        let token = self.inner.backend.authenticate().await?;
        *self.inner.token.write().await = Some(token);
        tracing::info!("Authenticated with geocoding service");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.token.read().await.is_some()
    }

    /// Geocode a single address (rate-limited, retried, cached)
    pub async fn geocode_one(&self, address: &str) -> GeocodeOutcome {
        self.lookup(address).await.0
    }

    /// Geocode many addresses; individual failures never abort the batch
    ///
    /// When `checkpoint_store` is given, accumulated rows are saved to
    /// `options.checkpoint_name` every `options.checkpoint_interval`
    /// completed addresses.
    pub async fn geocode_many(
        &self,
        addresses: &[String],
        options: &BatchOptions,
        checkpoint_store: Option<&ArtifactStore>,
    ) -> BatchResult {
        let mut seen = HashSet::new();
        let queue: Vec<String> = addresses
            .iter()
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect();

        if queue.is_empty() {
            return BatchResult::default();
        }

        let started = Instant::now();
        let mut progress = BatchProgress::new(queue.len(), options, checkpoint_store);

        if options.parallel && options.workers > 1 && queue.len() > 1 {
            tracing::info!(total = queue.len(), workers = options.workers, "Geocoding in parallel");
            self.run_parallel(queue.clone(), options.workers, &mut progress).await;
        } else {
            tracing::info!(total = queue.len(), "Geocoding sequentially");
            self.run_sequential(&queue, &mut progress).await;
        }

        let result = progress.finish(&queue);
        tracing::info!(
            total = queue.len(),
            geocoded = result.geocoded_count(),
            rows = result.rows.len(),
            failed = result.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Geocoding batch complete"
        );
        result
    }

    async fn run_sequential(&self, queue: &[String], progress: &mut BatchProgress<'_>) {
        for (i, address) in queue.iter().enumerate() {
            let (outcome, networked) = self.lookup(address).await;
            progress.record(address.clone(), outcome).await;

            if networked && i + 1 < queue.len() {
                tokio::time::sleep(self.inner.request_delay).await;
            }
        }
    }

    async fn run_parallel(&self, queue: Vec<String>, workers: usize, progress: &mut BatchProgress<'_>) {
        let workers = workers.clamp(1, queue.len());
        let (task_tx, task_rx) = mpsc::channel::<String>(workers * 2);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(String, GeocodeOutcome)>(workers * 2);

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let client = self.clone();
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            pool.spawn(async move { client.worker_loop(worker_id, task_rx, result_tx).await });
        }
        drop(result_tx);

        pool.spawn(async move {
            for address in queue {
                if task_tx.send(address).await.is_err() {
                    break;
                }
            }
        });

        while let Some((address, outcome)) = result_rx.recv().await {
            progress.record(address, outcome).await;
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Geocoding worker task failed");
            }
        }
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        task_rx: Arc<Mutex<mpsc::Receiver<String>>>,
        result_tx: mpsc::Sender<(String, GeocodeOutcome)>,
    ) {
        let mut handled = 0usize;
        loop {
            let next = task_rx.lock().await.recv().await;
            let Some(address) = next else { break };

            let (outcome, networked) = self.lookup(&address).await;
            handled += 1;
            if result_tx.send((address, outcome)).await.is_err() {
                break;
            }
            if networked {
                tokio::time::sleep(self.inner.request_delay).await;
            }
        }
        tracing::debug!(worker_id, handled, "Geocoding worker finished");
    }

    /// Outcome plus whether the network was touched (cache miss)
    async fn lookup(&self, address: &str) -> (GeocodeOutcome, bool) {
        let networked = AtomicBool::new(false);
        let flag = &networked;
        let fetch = move || async move {
            flag.store(true, Ordering::Relaxed);
            self.fetch(address).await
        };

        let result = match &self.inner.cache {
            Some(cache) => {
                let key = format!("{CACHE_KEY_PREFIX}{address}");
                cache
                    .cached_call(&key, Some(self.inner.cache_duration_hours), fetch)
                    .await
            }
            None => fetch().await,
        };

        let outcome = match result {
            Ok(rows) => GeocodeOutcome::Found(rows),
            Err(e) => GeocodeOutcome::Failed(e),
        };
        (outcome, networked.load(Ordering::Relaxed))
    }

    async fn fetch(&self, address: &str) -> Result<Vec<GeocodedAddress>, GeocodeError> {
        let inner = &*self.inner;
        let hits = retry_with_backoff("geocode search", &inner.retry, || async move {
            inner.limiter.until_ready().await;
            let token = inner
                .token
                .read()
                .await
                .clone()
                .ok_or(GeocodeError::NotAuthenticated)?;
            inner.backend.search(&token, address).await
        })
        .await?;

        to_candidates(address, hits)
    }
}

/// Convert raw hits to ranked rows
///
/// Hits without parseable latitude/longitude are dropped and the remaining
/// ones are re-ranked from 0, so rank 0 is always a usable best match.
pub fn to_candidates(address: &str, hits: Vec<SearchHit>) -> Result<Vec<GeocodedAddress>, GeocodeError> {
    let total = hits.len();
    let rows: Vec<GeocodedAddress> = hits
        .into_iter()
        .filter_map(|hit| {
            let latitude = parse_coordinate(&hit.latitude)?;
            let longitude = parse_coordinate(&hit.longitude)?;
            Some(GeocodedAddress {
                address: address.to_string(),
                search_result: 0,
                x: parse_coordinate(&hit.x),
                y: parse_coordinate(&hit.y),
                searchval: hit.searchval,
                blk_no: hit.blk_no,
                road_name: hit.road_name,
                building: hit.building,
                full_address: hit.address,
                postal: hit.postal,
                latitude,
                longitude,
            })
        })
        .enumerate()
        .map(|(rank, mut row)| {
            row.search_result = rank as u32;
            row
        })
        .collect();

    if rows.is_empty() {
        if total > 0 {
            tracing::debug!(address, dropped = total, "No candidate had usable coordinates");
        }
        return Err(GeocodeError::NoMatches(address.to_string()));
    }
    Ok(rows)
}

fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Collector state for one batch
struct BatchProgress<'a> {
    total: usize,
    completed: usize,
    rows: Vec<GeocodedAddress>,
    failed: Vec<String>,
    seen: HashSet<String>,
    checkpoint_interval: usize,
    checkpoint_name: &'a str,
    store: Option<&'a ArtifactStore>,
    started: Instant,
}

impl<'a> BatchProgress<'a> {
    fn new(total: usize, options: &'a BatchOptions, store: Option<&'a ArtifactStore>) -> Self {
        Self {
            total,
            completed: 0,
            rows: Vec::new(),
            failed: Vec::new(),
            seen: HashSet::new(),
            checkpoint_interval: options.checkpoint_interval,
            checkpoint_name: &options.checkpoint_name,
            store,
            started: Instant::now(),
        }
    }

    async fn record(&mut self, address: String, outcome: GeocodeOutcome) {
        match outcome {
            GeocodeOutcome::Found(rows) => self.rows.extend(rows),
            GeocodeOutcome::Failed(e) => {
                tracing::warn!(address = %address, error = %e, "Geocoding failed");
                self.failed.push(address.clone());
            }
        }
        self.seen.insert(address);
        self.completed += 1;

        if self.completed % PROGRESS_LOG_INTERVAL == 0 || self.completed == self.total {
            tracing::info!(
                completed = self.completed,
                total = self.total,
                failed = self.failed.len(),
                elapsed_s = self.started.elapsed().as_secs(),
                "Geocoding progress"
            );
        }

        if self.checkpoint_interval > 0
            && self.completed % self.checkpoint_interval == 0
            && self.completed < self.total
        {
            self.checkpoint().await;
        }
    }

    /// Snapshot the rows so far; the parquet write runs on the blocking pool
    async fn checkpoint(&self) {
        let Some(store) = self.store else { return };
        if self.rows.is_empty() {
            return;
        }

        let store = store.clone();
        let rows = self.rows.clone();
        let name = self.checkpoint_name.to_string();
        let saved = tokio::task::spawn_blocking(move || {
            store.save(&rows, &name, SaveOptions::new().source("geocoding checkpoint"))
        })
        .await;

        match saved {
            Ok(Ok(meta)) => tracing::info!(
                completed = self.completed,
                rows = meta.rows,
                dataset = self.checkpoint_name,
                "Saved geocoding checkpoint"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to save geocoding checkpoint"),
            Err(e) => tracing::warn!(error = %e, "Checkpoint task failed"),
        }
    }

    /// Addresses that never reported back (aborted worker) count as failed
    fn finish(mut self, queue: &[String]) -> BatchResult {
        for address in queue {
            if !self.seen.contains(address) {
                tracing::warn!(address = %address, "No result reported for address");
                self.failed.push(address.clone());
            }
        }
        BatchResult {
            rows: self.rows,
            failed: self.failed,
        }
    }
}
