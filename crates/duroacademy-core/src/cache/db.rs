use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, FileBackend, MemoryBackend};
use super::clock::{Clock, SystemClock};
use super::entry::{CacheEntry, MetaEntry};

/// Read-through TTL cache.
///
/// Construct one at startup and hand clones to whatever needs it; clones
/// share the same backend. None of the methods return storage errors: a
/// failing backend is logged and behaves like an empty cache.
#[derive(Clone)]
pub struct CacheDb {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl CacheDb {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for stamping and expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a file-backed cache, falling back to memory if the directory
    /// cannot be created.
    pub async fn open(dir: PathBuf) -> Self {
        match FileBackend::open(dir.clone()).await {
            Ok(backend) => {
                debug!(?dir, "Cache opened");
                Self::new(Arc::new(backend))
            }
            Err(e) => {
                warn!(?dir, error = %e, "Cache directory unusable, using in-memory cache");
                Self::in_memory()
            }
        }
    }

    /// Fresh value for `key`, or `None`. Expired entries are removed.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.fresh_entry(key).await?;
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    async fn fresh_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = match self.backend.get_entry(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            debug!(key, "Cache entry expired");
            self.delete(key).await;
            return None;
        }
        Some(entry)
    }

    /// Store `value` under `key`, stamped now. `ttl = None` never expires.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Value not cacheable");
                return;
            }
        };
        let ttl_ms = ttl.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl_ms);
        if let Err(e) = self.backend.put_entry(&entry).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete_entry(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }

    /// Drop every value and metadata record. Used at logout.
    pub async fn clear_all(&self) {
        if let Err(e) = self.backend.clear_entries().await {
            warn!(error = %e, "Failed to clear cache values");
        }
        if let Err(e) = self.backend.clear_meta().await {
            warn!(error = %e, "Failed to clear cache metadata");
        }
    }

    /// Return the cached value for `key` if fresh, otherwise run `loader`,
    /// cache its result with `ttl` and return it.
    ///
    /// `force_refresh` skips the lookup. Loader errors are returned as-is and
    /// nothing is stored.
    pub async fn fetch_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
        force_refresh: bool,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !force_refresh {
            if let Some(cached) = self.get::<T>(key).await {
                debug!(key, "Cache hit");
                return Ok(cached);
            }
        }

        debug!(key, force_refresh, "Cache miss, loading");
        let value = loader().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Delete every expired entry and return how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let entries = match self.backend.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cache scan failed");
                return 0;
            }
        };

        let now = self.clock.now();
        let mut removed = 0;
        for entry in entries.iter().filter(|e| e.is_expired(now)) {
            match self.backend.delete_entry(&entry.key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %entry.key, error = %e, "Failed to remove expired entry"),
            }
        }

        if removed > 0 {
            info!(removed, "Removed expired cache entries");
        }
        removed
    }

    /// Human-readable age of a fresh entry, e.g. "5m ago".
    pub async fn age_display(&self, key: &str) -> Option<String> {
        let entry = self.fresh_entry(key).await?;
        Some(entry.age_display(self.clock.now()))
    }

    // ===== Metadata =====

    pub async fn get_meta(&self, key: &str) -> Option<String> {
        match self.backend.get_meta(key).await {
            Ok(entry) => entry.map(|m| m.value),
            Err(e) => {
                warn!(key, error = %e, "Cache metadata read failed");
                None
            }
        }
    }

    pub async fn set_meta(&self, key: &str, value: &str) {
        let entry = MetaEntry {
            key: key.to_string(),
            value: value.to_string(),
        };
        if let Err(e) = self.backend.put_meta(&entry).await {
            warn!(key, error = %e, "Cache metadata write failed");
        }
    }

    pub async fn delete_meta(&self, key: &str) {
        if let Err(e) = self.backend.delete_meta(key).await {
            warn!(key, error = %e, "Cache metadata delete failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::CacheError;
    use crate::cache::clock::ManualClock;
    use crate::cache::TtlPreset;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_with_clock() -> (CacheDb, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = CacheDb::in_memory().with_clock(clock.clone());
        (cache, clock)
    }

    /// Backend whose every call fails.
    struct BrokenBackend;

    fn broken() -> CacheError {
        CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
    }

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get_entry(&self, _: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(broken())
        }
        async fn put_entry(&self, _: &CacheEntry) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn delete_entry(&self, _: &str) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn list_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
            Err(broken())
        }
        async fn clear_entries(&self) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn get_meta(&self, _: &str) -> Result<Option<MetaEntry>, CacheError> {
            Err(broken())
        }
        async fn put_meta(&self, _: &MetaEntry) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn delete_meta(&self, _: &str) -> Result<(), CacheError> {
            Err(broken())
        }
        async fn clear_meta(&self) -> Result<(), CacheError> {
            Err(broken())
        }
    }

    #[tokio::test]
    async fn test_get_respects_ttl_boundary() {
        let (cache, clock) = cache_with_clock();
        cache
            .set("counts", &vec![1, 2, 3], Some(Duration::from_millis(1_000)))
            .await;

        clock.advance(ChronoDuration::milliseconds(999));
        assert_eq!(cache.get::<Vec<i32>>("counts").await, Some(vec![1, 2, 3]));

        clock.advance(ChronoDuration::milliseconds(2));
        assert_eq!(cache.get::<Vec<i32>>("counts").await, None);
    }

    #[tokio::test]
    async fn test_expired_get_deletes_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::default());
        let cache = CacheDb::new(backend.clone()).with_clock(clock.clone());

        cache.set("k", &"v", TtlPreset::Short.duration()).await;
        clock.advance(ChronoDuration::minutes(3));
        assert!(cache.get::<String>("k").await.is_none());
        assert!(backend.get_entry("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_ttl_survives_long_delay() {
        let (cache, clock) = cache_with_clock();
        cache.set("profile", &"ada", TtlPreset::Session.duration()).await;

        clock.advance(ChronoDuration::days(400));
        assert_eq!(cache.get::<String>("profile").await.as_deref(), Some("ada"));

        cache.delete("profile").await;
        assert!(cache.get::<String>("profile").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = CacheDb::in_memory();
        cache.delete("missing").await;
        cache.set("k", &1, None).await;
        cache.delete("k").await;
        cache.delete("k").await;
        assert!(cache.get::<i32>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_or_compute_hit_skips_loader() {
        let cache = CacheDb::in_memory();
        cache.set("modules", &vec!["a".to_string()], TtlPreset::Long.duration()).await;

        let calls = AtomicUsize::new(0);
        let result: Result<Vec<String>, String> = cache
            .fetch_or_compute(
                "modules",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["b".to_string()])
                },
                TtlPreset::Long.duration(),
                false,
            )
            .await;

        assert_eq!(result.unwrap(), vec!["a".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_or_compute_miss_loads_once_and_stores() {
        let (cache, clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        let result: Result<u64, String> = cache
            .fetch_or_compute(
                "users:count",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                },
                Some(Duration::from_millis(500)),
                false,
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<u64>("users:count").await, Some(42));

        // Stored with the given ttl
        clock.advance(ChronoDuration::milliseconds(501));
        assert_eq!(cache.get::<u64>("users:count").await, None);
    }

    #[tokio::test]
    async fn test_fetch_or_compute_expired_entry_reloads() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", &1, Some(Duration::from_millis(10))).await;
        clock.advance(ChronoDuration::milliseconds(11));

        let result: Result<i32, String> = cache
            .fetch_or_compute("k", || async { Ok(2) }, None, false)
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(cache.get::<i32>("k").await, Some(2));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_value() {
        let cache = CacheDb::in_memory();
        cache.set("k", &"old", TtlPreset::VeryLong.duration()).await;

        let calls = AtomicUsize::new(0);
        let result: Result<String, String> = cache
            .fetch_or_compute(
                "k",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("new".to_string())
                },
                TtlPreset::VeryLong.duration(),
                true,
            )
            .await;

        assert_eq!(result.unwrap(), "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_stores_nothing() {
        let cache = CacheDb::in_memory();
        let result: Result<i32, String> = cache
            .fetch_or_compute("k", || async { Err("network down".to_string()) }, None, false)
            .await;

        assert_eq!(result.unwrap_err(), "network down");
        assert!(cache.get::<i32>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_loader_error_keeps_previous_value_on_force_refresh() {
        let cache = CacheDb::in_memory();
        cache.set("k", &1, None).await;
        let result: Result<i32, String> = cache
            .fetch_or_compute("k", || async { Err("boom".to_string()) }, None, true)
            .await;

        assert!(result.is_err());
        assert_eq!(cache.get::<i32>("k").await, Some(1));
    }

    #[tokio::test]
    async fn test_clear_all_twice() {
        let cache = CacheDb::in_memory();
        cache.set("a", &1, None).await;
        cache.set_meta("remembered_email", "ada@duro.academy").await;

        cache.clear_all().await;
        assert!(cache.get::<i32>("a").await.is_none());
        assert!(cache.get_meta("remembered_email").await.is_none());

        cache.clear_all().await;
        assert!(cache.get::<i32>("a").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired_counts_removed() {
        let (cache, clock) = cache_with_clock();
        cache.set("short", &1, TtlPreset::Short.duration()).await;
        cache.set("medium", &2, TtlPreset::Medium.duration()).await;
        cache.set("session", &3, TtlPreset::Session.duration()).await;

        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(cache.cleanup_expired().await, 1);
        assert_eq!(cache.cleanup_expired().await, 0);

        clock.advance(ChronoDuration::hours(1));
        assert_eq!(cache.cleanup_expired().await, 1);
        assert_eq!(cache.get::<i32>("session").await, Some(3));
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_miss() {
        let cache = CacheDb::new(Arc::new(BrokenBackend));

        cache.set("k", &1, None).await;
        assert!(cache.get::<i32>("k").await.is_none());
        cache.delete("k").await;
        cache.clear_all().await;
        assert_eq!(cache.cleanup_expired().await, 0);
        assert!(cache.get_meta("m").await.is_none());

        let result: Result<i32, String> = cache
            .fetch_or_compute("k", || async { Ok(7) }, None, false)
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_a_miss() {
        let cache = CacheDb::in_memory();
        cache.set("k", &"text", None).await;
        assert!(cache.get::<Vec<u32>>("k").await.is_none());

        let result: Result<Vec<u32>, String> = cache
            .fetch_or_compute("k", || async { Ok(vec![1]) }, None, false)
            .await;
        assert_eq!(result.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_meta_round_trip() {
        let cache = CacheDb::in_memory();
        assert!(cache.get_meta("remembered_email").await.is_none());
        cache.set_meta("remembered_email", "ada@duro.academy").await;
        assert_eq!(
            cache.get_meta("remembered_email").await.as_deref(),
            Some("ada@duro.academy")
        );
        cache.delete_meta("remembered_email").await;
        assert!(cache.get_meta("remembered_email").await.is_none());
    }

    #[tokio::test]
    async fn test_age_display() {
        let (cache, clock) = cache_with_clock();
        assert!(cache.age_display("k").await.is_none());
        cache.set("k", &1, None).await;
        clock.advance(ChronoDuration::minutes(12));
        assert_eq!(cache.age_display("k").await.as_deref(), Some("12m ago"));
    }

    #[tokio::test]
    async fn test_file_backed_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDb::open(dir.path().join("cache")).await;
        cache.set("k", &vec![1, 2], TtlPreset::Medium.duration()).await;

        let reopened = CacheDb::open(dir.path().join("cache")).await;
        assert_eq!(reopened.get::<Vec<i32>>("k").await, Some(vec![1, 2]));
    }
}
