//! Cross-process mutual exclusion with in-process single-flight joining
//!
//! A lock is backed by a marker file in the shared temp directory, created
//! with exclusive-create semantics. Within one process, concurrent callers
//! for the same name join the in-flight execution instead of contending on
//! the filesystem.

use crate::config::schema::LockConfig;
use crate::config::Posture;
use crate::error::{ForgeError, ForgeResult};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Outcome published to in-process joiners. Errors cross the channel as
/// messages because `ForgeError` is not `Clone`.
type LockOutcome = Result<(), String>;

/// Seam for substituting a distributed lock service without touching
/// call sites.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Run `f` under the named lock. See [`LockManager::with_lock`].
    async fn with_lock_boxed<'a>(
        &self,
        name: &str,
        f: BoxFuture<'a, ForgeResult<()>>,
    ) -> ForgeResult<()>;
}

/// File-based lock manager for single-host deployments
pub struct LockManager {
    marker_dir: PathBuf,
    posture: Posture,
    wait_timeout: Duration,
    poll_interval: Duration,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<LockOutcome>>>>,
}

impl LockManager {
    /// Create a lock manager writing markers under `marker_dir`
    pub fn new(
        marker_dir: PathBuf,
        posture: Posture,
        wait_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            marker_dir,
            posture,
            wait_timeout,
            poll_interval,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Create a lock manager from configuration, with markers in the
    /// shared temp directory
    pub fn from_config(posture: Posture, lock: &LockConfig) -> Self {
        Self::new(
            std::env::temp_dir(),
            posture,
            Duration::from_secs(lock.wait_timeout_secs),
            Duration::from_secs(lock.poll_interval_secs),
        )
    }

    /// Path of the marker file backing the named lock
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.marker_dir.join(format!("setupforge-{name}.lock"))
    }

    /// Remove a marker left behind by a crashed prior run. Best-effort;
    /// used before forced refreshes.
    pub async fn clear_stale_marker(&self, name: &str) {
        let marker = self.marker_path(name);
        match fs::remove_file(&marker).await {
            Ok(()) => info!("Removed stale lock marker: {}", marker.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove lock marker {}: {}", marker.display(), e),
        }
    }

    /// Run `f` while holding the named lock.
    ///
    /// In-process callers for a name already executing join that call's
    /// outcome instead of starting a second execution. If another OS
    /// process holds the marker, this call waits for the marker to
    /// disappear (bounded) and returns without running `f`; callers must
    /// be idempotent with respect to whether `f` actually ran.
    pub async fn with_lock<F, Fut>(&self, name: &str, f: F) -> ForgeResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ForgeResult<()>>,
    {
        if !valid_name(name) {
            return Err(ForgeError::LockName(name.to_string()));
        }

        let publish = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(rx) = in_flight.get(name) {
                let rx = rx.clone();
                drop(in_flight);
                debug!("Lock '{}' already executing in-process, joining", name);
                return join_outcome(name, rx).await;
            }
            let (tx, rx) = watch::channel(None);
            in_flight.insert(name.to_string(), rx);
            tx
        };

        let result = self.run_exclusive(name, f).await;

        // Release the in-process slot before publishing so a later caller
        // can start a fresh execution.
        self.in_flight.lock().await.remove(name);
        let outcome = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        let _ = publish.send(Some(outcome));

        result
    }

    /// Acquire the marker file and run `f`, or wait out a holder in
    /// another process.
    async fn run_exclusive<F, Fut>(&self, name: &str, f: F) -> ForgeResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ForgeResult<()>>,
    {
        let marker = self.marker_path(name);

        match self.try_create_marker(&marker).await? {
            true => {}
            false => {
                if self.posture == Posture::Development {
                    // No in-process record exists for this name, so in an
                    // iterative-run environment the marker is a leftover
                    // from a crashed prior run.
                    info!("Lock '{}': removing stale development marker", name);
                    self.clear_stale_marker(name).await;
                    if !self.try_create_marker(&marker).await? {
                        self.wait_for_release(name, &marker).await;
                        return Ok(());
                    }
                } else {
                    self.wait_for_release(name, &marker).await;
                    return Ok(());
                }
            }
        }

        debug!("Lock '{}' acquired: {}", name, marker.display());
        let result = f().await;

        // Guaranteed cleanup: the marker goes away whether f succeeded
        // or not.
        if let Err(e) = fs::remove_file(&marker).await {
            warn!("Failed to remove lock marker {}: {}", marker.display(), e);
        }
        debug!("Lock '{}' released", name);

        result
    }

    /// Exclusive-create the marker. Returns false when it already exists.
    async fn try_create_marker(&self, marker: &Path) -> ForgeResult<bool> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(marker)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(ForgeError::io(
                format!("creating lock marker {}", marker.display()),
                e,
            )),
        }
    }

    /// Poll for the marker's disappearance. A soft bound: exceeding it
    /// logs and gives up without failing, since the protected action
    /// simply did not run for this caller.
    async fn wait_for_release(&self, name: &str, marker: &Path) {
        info!("Lock '{}' held by another process, waiting", name);
        let max_polls = (self.wait_timeout.as_millis() / self.poll_interval.as_millis().max(1))
            .max(1) as u64;

        for i in 0..max_polls {
            if !marker.exists() {
                debug!("Lock '{}' released by other process after {} polls", name, i);
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        if marker.exists() {
            warn!(
                "Lock '{}' still held after {}s, giving up the wait",
                name,
                self.wait_timeout.as_secs()
            );
        }
    }
}

#[async_trait]
impl LockProvider for LockManager {
    async fn with_lock_boxed<'a>(
        &self,
        name: &str,
        f: BoxFuture<'a, ForgeResult<()>>,
    ) -> ForgeResult<()> {
        self.with_lock(name, || f).await
    }
}

/// Await the in-flight execution's published outcome
async fn join_outcome(
    name: &str,
    mut rx: watch::Receiver<Option<LockOutcome>>,
) -> ForgeResult<()> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome.map_err(|message| ForgeError::LockFailed {
                name: name.to_string(),
                message,
            });
        }
        if rx.changed().await.is_err() {
            return Err(ForgeError::LockFailed {
                name: name.to_string(),
                message: "lock holder terminated without publishing an outcome".to_string(),
            });
        }
    }
}

/// Lock names: letters, digits, dash, underscore
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, posture: Posture) -> LockManager {
        LockManager::new(
            dir.path().to_path_buf(),
            posture,
            Duration::from_millis(300),
            Duration::from_millis(25),
        )
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("downloading-winget"));
        assert!(valid_name("server_initialization"));
        assert!(valid_name("a1"));
        assert!(!valid_name(""));
        assert!(!valid_name("has space"));
        assert!(!valid_name("dots.not.allowed"));
        assert!(!valid_name("slash/no"));
    }

    #[tokio::test]
    async fn invalid_name_rejected_without_io() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Production);

        let result = mgr.with_lock("bad name", || async { Ok(()) }).await;
        assert!(matches!(result, Err(ForgeError::LockName(_))));
        // no marker file was attempted
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn runs_function_and_removes_marker() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Production);
        let ran = Arc::new(AtomicUsize::new(0));

        let ran2 = ran.clone();
        mgr.with_lock("demo", move || async move {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!mgr.marker_path("demo").exists());
    }

    #[tokio::test]
    async fn marker_removed_on_error() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Production);

        let result = mgr
            .with_lock("failing", || async { Err(ForgeError::Internal("boom".into())) })
            .await;

        assert!(result.is_err());
        assert!(!mgr.marker_path("failing").exists());
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce() {
        let dir = TempDir::new().unwrap();
        let mgr = Arc::new(manager(&dir, Posture::Production));
        let ran = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let mgr = mgr.clone();
            let ran = ran.clone();
            handles.push(tokio::spawn(async move {
                mgr.with_lock("shared", move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn joiners_observe_leader_failure() {
        let dir = TempDir::new().unwrap();
        let mgr = Arc::new(manager(&dir, Posture::Production));

        let leader_mgr = mgr.clone();
        let leader = tokio::spawn(async move {
            leader_mgr
                .with_lock("fails-shared", || async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Err(ForgeError::Internal("leader failed".into()))
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let joined = mgr.with_lock("fails-shared", || async { Ok(()) }).await;

        assert!(leader.await.unwrap().is_err());
        match joined {
            Err(ForgeError::LockFailed { message, .. }) => {
                assert!(message.contains("leader failed"));
            }
            other => panic!("expected LockFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn waits_for_foreign_marker_then_skips() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Production);
        let marker = mgr.marker_path("foreign");
        std::fs::write(&marker, b"").unwrap();

        // Simulated other process releases the lock after a few polls
        let release = marker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let _ = std::fs::remove_file(release);
        });

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        mgr.with_lock("foreign", move || async move {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        // fn never ran: the other process did the work
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_bound_exceeded_returns_ok() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Production);
        let marker = mgr.marker_path("stuck");
        std::fs::write(&marker, b"").unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let result = mgr
            .with_lock("stuck", move || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        std::fs::remove_file(&marker).unwrap();
    }

    #[tokio::test]
    async fn development_posture_clears_stale_marker() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Development);
        let marker = mgr.marker_path("stale");
        std::fs::write(&marker, b"").unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        mgr.with_lock("stale", move || async move {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn trait_object_runs_boxed_future() {
        let dir = TempDir::new().unwrap();
        let mgr: Arc<dyn LockProvider> = Arc::new(manager(&dir, Posture::Production));
        let ran = Arc::new(AtomicUsize::new(0));

        let ran2 = ran.clone();
        mgr.with_lock_boxed(
            "boxed",
            Box::pin(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_rerun() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Posture::Production);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let ran2 = ran.clone();
            mgr.with_lock("again", move || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
