//! Process-wide catalog cache
//!
//! Explicit `Empty -> Loading -> Ready` state machine in front of the
//! snapshot fetch + manifest load. Concurrent readers during a load join
//! the in-flight result. A durable JSON snapshot with a sibling
//! epoch-millis timestamp file lets a fresh process skip the full refresh
//! while the copy is younger than the TTL.

use crate::catalog::manifest::ManifestRecord;
use crate::error::ForgeResult;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// The full resolved catalog at one point in time
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// Resolved records, one per package identifier
    pub records: Vec<ManifestRecord>,

    /// When the snapshot was derived
    pub fetched_at: DateTime<Utc>,
}

/// Where catalog data comes from on a cache miss.
///
/// Production wires this to the snapshot fetch + manifest load pair;
/// tests substitute a stub.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> ForgeResult<Vec<ManifestRecord>>;
}

type LoadResult = Option<Arc<CatalogSnapshot>>;

enum CacheState {
    Empty,
    Loading(watch::Receiver<Option<LoadResult>>),
    Ready(Arc<CatalogSnapshot>),
}

/// TTL-bounded in-memory + durable catalog cache
pub struct CatalogCache {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    snapshot_path: PathBuf,
    timestamp_path: PathBuf,
    state: Mutex<CacheState>,
}

impl CatalogCache {
    /// Default durable snapshot location in the shared temp directory
    pub fn default_snapshot_path() -> PathBuf {
        std::env::temp_dir().join("setupforge-catalog-cache.json")
    }

    /// Default durable timestamp location
    pub fn default_timestamp_path() -> PathBuf {
        std::env::temp_dir().join("setupforge-catalog-cache-timestamp.txt")
    }

    /// Create a cache over `source` with the given TTL
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self::with_paths(
            source,
            ttl,
            Self::default_snapshot_path(),
            Self::default_timestamp_path(),
        )
    }

    /// Create a cache with explicit durable file locations
    pub fn with_paths(
        source: Arc<dyn CatalogSource>,
        ttl: Duration,
        snapshot_path: PathBuf,
        timestamp_path: PathBuf,
    ) -> Self {
        Self {
            source,
            ttl,
            snapshot_path,
            timestamp_path,
            state: Mutex::new(CacheState::Empty),
        }
    }

    /// Prime the cache once at startup, outside request handling.
    ///
    /// Trusts a durable snapshot younger than the TTL; otherwise performs
    /// the full fetch + load. Returns the snapshot, or `None` when loading
    /// failed (the cache stays `Empty` and clients retry later).
    pub async fn prime(&self) -> Option<Arc<CatalogSnapshot>> {
        {
            let mut state = self.state.lock().await;
            match &*state {
                CacheState::Ready(snap) => return Some(snap.clone()),
                CacheState::Loading(rx) => {
                    let rx = rx.clone();
                    drop(state);
                    return wait_for_load(rx).await;
                }
                CacheState::Empty => {
                    if let Some(snap) = self.load_durable().await {
                        info!(
                            "Loaded {} packages from durable snapshot",
                            snap.records.len()
                        );
                        *state = CacheState::Ready(snap.clone());
                        return Some(snap);
                    }
                }
            }
        }

        info!("No durable snapshot available, loading fresh catalog data");
        self.run_load().await
    }

    /// Get the current catalog.
    ///
    /// Joins an in-flight load; falls back to the durable snapshot; never
    /// triggers a network refresh. `None` means "not ready yet", not
    /// "zero packages exist".
    pub async fn get(&self) -> Option<Arc<CatalogSnapshot>> {
        let rx = {
            let mut state = self.state.lock().await;
            match &*state {
                CacheState::Ready(snap) => return Some(snap.clone()),
                CacheState::Loading(rx) => rx.clone(),
                CacheState::Empty => {
                    debug!("Memory cache empty, trying durable snapshot");
                    if let Some(snap) = self.load_durable().await {
                        *state = CacheState::Ready(snap.clone());
                        return Some(snap);
                    }
                    return None;
                }
            }
        };

        debug!("Catalog load in flight, waiting for it to finish");
        wait_for_load(rx).await
    }

    /// Force a refresh: clear memory and durable state, then fetch and
    /// load regardless of TTL. Manual invalidation only.
    pub async fn refresh(&self) -> Option<Arc<CatalogSnapshot>> {
        info!("Force refreshing catalog cache");
        self.clear().await;
        self.run_load().await
    }

    /// Drop the in-memory state and delete the durable snapshot files
    pub async fn clear(&self) {
        {
            let mut state = self.state.lock().await;
            *state = CacheState::Empty;
        }
        for path in [&self.snapshot_path, &self.timestamp_path] {
            match fs::remove_file(path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        info!("Catalog cache cleared");
    }

    /// Execute the source load with single-flight semantics
    async fn run_load(&self) -> Option<Arc<CatalogSnapshot>> {
        let publish = {
            let mut state = self.state.lock().await;
            match &*state {
                CacheState::Ready(snap) => return Some(snap.clone()),
                CacheState::Loading(rx) => {
                    let rx = rx.clone();
                    drop(state);
                    return wait_for_load(rx).await;
                }
                CacheState::Empty => {
                    let (tx, rx) = watch::channel(None);
                    *state = CacheState::Loading(rx);
                    tx
                }
            }
        };

        let outcome: LoadResult = match self.source.load().await {
            Ok(records) => {
                let snap = Arc::new(CatalogSnapshot {
                    records,
                    fetched_at: Utc::now(),
                });
                self.persist_durable(&snap).await;
                info!("Catalog ready: {} packages", snap.records.len());
                Some(snap)
            }
            Err(e) => {
                // Callers see "no data"; the cache stays Empty for a later retry
                error!("Catalog load failed: {e}");
                None
            }
        };

        {
            let mut state = self.state.lock().await;
            *state = match &outcome {
                Some(snap) => CacheState::Ready(snap.clone()),
                None => CacheState::Empty,
            };
        }
        let _ = publish.send(Some(outcome.clone()));

        outcome
    }

    /// Load the durable snapshot if it exists and is younger than the TTL
    async fn load_durable(&self) -> Option<Arc<CatalogSnapshot>> {
        let ts_raw = fs::read_to_string(&self.timestamp_path).await.ok()?;
        let ts_millis: i64 = ts_raw.trim().parse().ok()?;
        let fetched_at = Utc.timestamp_millis_opt(ts_millis).single()?;

        let age = Utc::now().signed_duration_since(fetched_at);
        if age < chrono::Duration::zero()
            || age.to_std().ok()? >= self.ttl
        {
            debug!("Durable snapshot expired (age {}s)", age.num_seconds());
            return None;
        }

        let raw = fs::read(&self.snapshot_path).await.ok()?;
        let records: Vec<ManifestRecord> = match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Durable snapshot unreadable, ignoring: {e}");
                return None;
            }
        };
        if records.is_empty() {
            return None;
        }

        Some(Arc::new(CatalogSnapshot {
            records,
            fetched_at,
        }))
    }

    /// Persist the snapshot and its timestamp marker. Whole-file
    /// overwrites; a torn read only costs a redundant refresh.
    async fn persist_durable(&self, snap: &Arc<CatalogSnapshot>) {
        let payload = match serde_json::to_vec(&snap.records) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize durable snapshot: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.snapshot_path, payload).await {
            warn!(
                "Failed to write durable snapshot {}: {}",
                self.snapshot_path.display(),
                e
            );
            return;
        }
        let millis = snap.fetched_at.timestamp_millis().to_string();
        if let Err(e) = fs::write(&self.timestamp_path, millis).await {
            warn!(
                "Failed to write snapshot timestamp {}: {}",
                self.timestamp_path.display(),
                e
            );
            return;
        }
        debug!(
            "Persisted durable snapshot ({} packages)",
            snap.records.len()
        );
    }
}

/// Await an in-flight load's published result
async fn wait_for_load(mut rx: watch::Receiver<Option<LoadResult>>) -> LoadResult {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubSource {
        loads: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl StubSource {
        fn new(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail,
                delay,
            })
        }
    }

    #[async_trait]
    impl CatalogSource for StubSource {
        async fn load(&self) -> ForgeResult<Vec<ManifestRecord>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ForgeError::Internal("stub failure".into()));
            }
            Ok(vec![record("Vendor.App", "1.0")])
        }
    }

    fn record(id: &str, version: &str) -> ManifestRecord {
        let yaml = format!(
            "PackageIdentifier: {id}\nPackageVersion: \"{version}\"\nPackageName: {id}\nShortDescription: d\nPublisher: p\n"
        );
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        ManifestRecord::from_yaml(&doc).unwrap()
    }

    fn cache(dir: &TempDir, source: Arc<dyn CatalogSource>, ttl: Duration) -> CatalogCache {
        CatalogCache::with_paths(
            source,
            ttl,
            dir.path().join("cache.json"),
            dir.path().join("cache-timestamp.txt"),
        )
    }

    #[tokio::test]
    async fn get_before_prime_returns_none() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::ZERO);
        let cache = cache(&dir, source.clone(), Duration::from_secs(3600));

        assert!(cache.get().await.is_none());
        // get never triggers a load
        assert_eq!(source.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn prime_loads_and_persists() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::ZERO);
        let cache = cache(&dir, source.clone(), Duration::from_secs(3600));

        let snap = cache.prime().await.unwrap();
        assert_eq!(snap.records.len(), 1);
        assert!(dir.path().join("cache.json").exists());
        assert!(dir.path().join("cache-timestamp.txt").exists());

        // now in memory
        let again = cache.get().await.unwrap();
        assert_eq!(again.records[0].id, "Vendor.App");
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_process_trusts_durable_snapshot() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::ZERO);
        cache(&dir, source.clone(), Duration::from_secs(3600))
            .prime()
            .await
            .unwrap();

        // second cache simulates a restarted process
        let source2 = StubSource::new(true, Duration::ZERO);
        let restarted = cache(&dir, source2.clone(), Duration::from_secs(3600));
        let snap = restarted.prime().await.unwrap();

        assert_eq!(snap.records.len(), 1);
        // no network access happened
        assert_eq!(source2.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_durable_snapshot_ignored() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::ZERO);
        let c = cache(&dir, source.clone(), Duration::from_millis(10));
        c.prime().await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let source2 = StubSource::new(false, Duration::ZERO);
        let restarted = cache(&dir, source2.clone(), Duration::from_millis(10));
        restarted.prime().await.unwrap();

        // expired, so the source ran again
        assert_eq!(source2.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_leaves_cache_empty() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(true, Duration::ZERO);
        let cache = cache(&dir, source.clone(), Duration::from_secs(3600));

        assert!(cache.prime().await.is_none());
        assert!(cache.get().await.is_none());
        assert!(!dir.path().join("cache.json").exists());

        // a later prime retries
        assert!(cache.prime().await.is_none());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_primes_single_flight() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::from_millis(60));
        let cache = Arc::new(cache(&dir, source.clone(), Duration::from_secs(3600)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.prime().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_joins_in_flight_load() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::from_millis(80));
        let cache = Arc::new(cache(&dir, source.clone(), Duration::from_secs(3600)));

        let primer = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.prime().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let joined = cache.get().await;
        assert!(joined.is_some());
        assert!(primer.await.unwrap().is_some());
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_clears_and_reloads() {
        let dir = TempDir::new().unwrap();
        let source = StubSource::new(false, Duration::ZERO);
        let cache = cache(&dir, source.clone(), Duration::from_secs(3600));

        cache.prime().await.unwrap();
        let snap = cache.refresh().await.unwrap();

        assert_eq!(snap.records.len(), 1);
        // refresh bypasses the TTL and reloads
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("cache.json").exists());
    }

    #[tokio::test]
    async fn empty_durable_snapshot_not_trusted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cache.json"), "[]").unwrap();
        std::fs::write(
            dir.path().join("cache-timestamp.txt"),
            Utc::now().timestamp_millis().to_string(),
        )
        .unwrap();

        let source = StubSource::new(false, Duration::ZERO);
        let cache = cache(&dir, source.clone(), Duration::from_secs(3600));

        // durable pair exists but holds zero packages; a real load runs
        cache.prime().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn garbage_timestamp_treated_as_no_cache() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cache.json"), "[]").unwrap();
        std::fs::write(dir.path().join("cache-timestamp.txt"), "not-a-number").unwrap();

        let source = StubSource::new(false, Duration::ZERO);
        let cache = cache(&dir, source.clone(), Duration::from_secs(3600));
        cache.prime().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }
}
