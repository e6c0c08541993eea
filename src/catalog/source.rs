//! Production catalog source: snapshot fetch + manifest load

use crate::catalog::cache::CatalogSource;
use crate::catalog::loader::load_catalog;
use crate::catalog::manifest::ManifestRecord;
use crate::error::ForgeResult;
use crate::fetch::{RepoSpec, SnapshotFetcher};
use crate::lock::LockProvider;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Lock name guarding the catalog snapshot download across processes
pub const DOWNLOAD_LOCK: &str = "downloading-catalog";

/// Loads the catalog by fetching a repository snapshot and walking its
/// `manifests/` tree
pub struct RepoCatalogSource {
    fetcher: SnapshotFetcher,
    spec: RepoSpec,
    dest_parent: PathBuf,
    batch_size: usize,
    locks: Option<Arc<dyn LockProvider>>,
}

impl RepoCatalogSource {
    pub fn new(
        fetcher: SnapshotFetcher,
        spec: RepoSpec,
        dest_parent: PathBuf,
        batch_size: usize,
    ) -> Self {
        Self {
            fetcher,
            spec,
            dest_parent,
            batch_size,
            locks: None,
        }
    }

    /// Guard the download with a cross-process lock. Without it the
    /// fetch runs bare (startup priming already holds the
    /// initialization lock).
    pub fn with_locks(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Directory the manifests land in after a fetch
    pub fn manifests_dir(&self) -> PathBuf {
        self.dest_parent.join(&self.spec.repo).join("manifests")
    }
}

#[async_trait]
impl CatalogSource for RepoCatalogSource {
    async fn load(&self) -> ForgeResult<Vec<ManifestRecord>> {
        match &self.locks {
            Some(locks) => {
                locks
                    .with_lock_boxed(
                        DOWNLOAD_LOCK,
                        Box::pin(async {
                            self.fetcher.fetch(&self.spec, &self.dest_parent).await?;
                            Ok(())
                        }),
                    )
                    .await?
            }
            None => {
                self.fetcher.fetch(&self.spec, &self.dest_parent).await?;
            }
        }

        info!("Loading package manifests");
        load_catalog(&self.manifests_dir(), self.batch_size).await
    }
}
