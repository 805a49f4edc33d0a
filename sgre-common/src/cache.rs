//! File-backed cache for expensive or rate-limited calls
//!
//! One file per key under the cache directory, named by the SHA-256 of the
//! caller's identifier. Each file holds a JSON envelope with the write
//! timestamp and the payload. Expiry is lazy: a stale entry reads as a miss
//! and is left on disk until overwritten or cleared.
//!
//! Entries that cannot be read or decoded are logged and treated as misses.
//! Writers of different keys never touch the same file; writers of the same
//! key race with last-rename-wins.

use crate::config::PipelineConfig;
use crate::{time, Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "cache";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    identifier: String,
    written_at: DateTime<Utc>,
    value: T,
}

/// Operational view of the cache directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub total_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Keyed cache with lazy time-based expiry
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
    enabled: bool,
    default_duration_hours: f64,
}

impl CacheManager {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_dir(
            config.cache_dir(),
            config.cache.enabled,
            config.cache.default_duration_hours,
        )
    }

    pub fn with_dir(dir: impl Into<PathBuf>, enabled: bool, default_duration_hours: f64) -> Self {
        Self {
            dir: dir.into(),
            enabled,
            default_duration_hours,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable key for an identifier
    pub fn key_for(identifier: &str) -> String {
        format!("{:x}", Sha256::digest(identifier.as_bytes()))
    }

    fn entry_path(&self, identifier: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::key_for(identifier), ENTRY_EXTENSION))
    }

    /// Cached value for `identifier` if present and younger than the duration
    ///
    /// `duration_hours` falls back to the configured default. Returns `None`
    /// when disabled, missing, expired, or undecodable.
    pub fn get<T: DeserializeOwned>(&self, identifier: &str, duration_hours: Option<f64>) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let path = self.entry_path(identifier);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache entry, treating as miss");
                return None;
            }
        };

        let hours = duration_hours.unwrap_or(self.default_duration_hours);
        let age = time::now() - envelope.written_at;
        if age > time::hours_to_duration(hours) {
            debug!(identifier, age_secs = age.num_seconds(), "Cache entry expired");
            return None;
        }

        debug!(identifier, "Cache hit");
        Some(envelope.value)
    }

    /// Store `value` under `identifier`; no-op when disabled
    pub fn set<T: Serialize>(&self, identifier: &str, value: &T) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)?;

        let envelope = Envelope {
            identifier: identifier.to_string(),
            written_at: time::now(),
            value,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let path = self.entry_path(identifier);
        let tmp = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, bytes)
            .map_err(|e| Error::internal(format!("Write cache entry {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::internal(format!("Replace cache entry {}", path.display()), e))?;

        debug!(identifier, "Cache entry written");
        Ok(())
    }

    /// Remove one entry, or every entry when `identifier` is `None`
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, identifier: Option<&str>) -> Result<usize> {
        match identifier {
            Some(identifier) => {
                let path = self.entry_path(identifier);
                match std::fs::remove_file(&path) {
                    Ok(()) => Ok(1),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                    Err(e) => Err(e.into()),
                }
            }
            None => {
                let mut removed = 0;
                for path in self.entry_files()? {
                    std::fs::remove_file(&path)?;
                    removed += 1;
                }
                tracing::info!(removed, dir = %self.dir.display(), "Cache cleared");
                Ok(removed)
            }
        }
    }

    /// Entry count, total size and age range, from file metadata
    pub fn get_stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats {
            enabled: self.enabled,
            entries: 0,
            total_bytes: 0,
            oldest: None,
            newest: None,
        };

        for path in self.entry_files()? {
            let meta = std::fs::metadata(&path)?;
            stats.entries += 1;
            stats.total_bytes += meta.len();

            if let Ok(modified) = meta.modified() {
                let modified: DateTime<Utc> = modified.into();
                stats.oldest = Some(stats.oldest.map_or(modified, |o| o.min(modified)));
                stats.newest = Some(stats.newest.map_or(modified, |n| n.max(modified)));
            }
        }

        Ok(stats)
    }

    /// Return the cached value, or run `f`, cache its `Ok` value, and return it
    ///
    /// Errors from `f` are returned unchanged and never cached. A failure to
    /// write the cache entry is logged; the fresh value is still returned.
    /// Entry file I/O runs on the blocking pool.
    pub async fn cached_call<T, E, F, Fut>(
        &self,
        identifier: &str,
        duration_hours: Option<f64>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let cache = self.clone();
        let key = identifier.to_string();
        match tokio::task::spawn_blocking(move || cache.get::<T>(&key, duration_hours)).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!(identifier, error = %e, "Cache read task failed"),
        }

        let value = f().await?;

        let cache = self.clone();
        let key = identifier.to_string();
        let entry = value.clone();
        match tokio::task::spawn_blocking(move || cache.set(&key, &entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(identifier, error = %e, "Failed to write cache entry"),
            Err(e) => warn!(identifier, error = %e, "Cache write task failed"),
        }
        Ok(value)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> CacheManager {
        CacheManager::with_dir(dir.path().join("cache"), true, 24.0)
    }

    #[test]
    fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);

        cache.set("search:1 MAIN ST", &vec![1.30, 103.85]).unwrap();
        let value: Option<Vec<f64>> = cache.get("search:1 MAIN ST", None);
        assert_eq!(value, Some(vec![1.30, 103.85]));
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let dir = TempDir::new().unwrap();
        let value: Option<String> = cache(&dir).get("nothing", None);
        assert!(value.is_none());
    }

    #[test]
    fn test_expiry_is_monotonic_in_duration() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", &"v").unwrap();

        std::thread::sleep(Duration::from_millis(50));

        // 1 hour window: still valid
        assert_eq!(cache.get::<String>("k", Some(1.0)), Some("v".to_string()));
        // ~3.6ms window: already stale
        assert_eq!(cache.get::<String>("k", Some(0.000001)), None);
        // Stale read does not delete
        assert_eq!(cache.get_stats().unwrap().entries, 1);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", &42u32).unwrap();

        std::fs::write(cache.entry_path("k"), b"\x00\x01garbage").unwrap();
        assert_eq!(cache.get::<u32>("k", None), None);
    }

    #[test]
    fn test_wrong_payload_type_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", &"text").unwrap();
        assert_eq!(cache.get::<u32>("k", None), None);
    }

    #[test]
    fn test_disabled_cache_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::with_dir(dir.path().join("cache"), false, 24.0);

        cache.set("k", &1u8).unwrap();
        assert_eq!(cache.get::<u8>("k", None), None);
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn test_clear_one_and_all() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("a", &1u8).unwrap();
        cache.set("b", &2u8).unwrap();
        cache.set("c", &3u8).unwrap();

        assert_eq!(cache.clear(Some("a")).unwrap(), 1);
        assert_eq!(cache.clear(Some("a")).unwrap(), 0);
        assert_eq!(cache.get::<u8>("b", None), Some(2));

        assert_eq!(cache.clear(None).unwrap(), 2);
        assert_eq!(cache.get_stats().unwrap().entries, 0);
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);

        let empty = cache.get_stats().unwrap();
        assert_eq!(empty.entries, 0);
        assert!(empty.oldest.is_none());

        cache.set("a", &"first").unwrap();
        cache.set("b", &"second").unwrap();

        let stats = cache.get_stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[tokio::test]
    async fn test_cached_call_invokes_once() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: std::result::Result<String, String> = cache
                .cached_call("expensive", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "computed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_call_does_not_cache_errors() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);

        let first: std::result::Result<u32, String> = cache
            .cached_call("flaky", None, || async { Err("boom".to_string()) })
            .await;
        assert!(first.is_err());

        let second: std::result::Result<u32, String> = cache
            .cached_call("flaky", None, || async { Ok(7) })
            .await;
        assert_eq!(second.unwrap(), 7);
    }
}
