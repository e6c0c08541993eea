//! CLI command implementations

pub mod build;
pub mod catalog;
pub mod config;
pub mod fetch;
pub mod prepare;
pub mod prime;
pub mod refresh;

pub use build::execute as build;
pub use catalog::execute as catalog;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use prepare::execute as prepare;
pub use prime::execute as prime;
pub use refresh::execute as refresh;

use crate::build::TemplatePreparer;
use crate::catalog::{CatalogCache, RepoCatalogSource};
use crate::config::{Config, ConfigManager};
use crate::fetch::{RepoSpec, SnapshotFetcher};
use crate::lock::LockManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Lock manager over the configured posture and bounds
pub(crate) fn lock_manager(config: &Config) -> Arc<LockManager> {
    Arc::new(LockManager::from_config(
        config.general.posture,
        &config.lock,
    ))
}

/// Catalog cache wired to the configured repository
pub(crate) fn catalog_cache(config: &Config, locks: Arc<LockManager>) -> CatalogCache {
    let fetcher = SnapshotFetcher::new(config.general.posture);
    let spec = RepoSpec::new(
        &config.catalog.owner,
        &config.catalog.repo,
        &config.catalog.branch,
    );
    let source = Arc::new(RepoCatalogSource::new(
        fetcher,
        spec,
        ConfigManager::catalog_dir(),
        config.catalog.batch_size,
    )
    .with_locks(locks));

    CatalogCache::new(
        source,
        Duration::from_secs(config.catalog.ttl_hours * 60 * 60),
    )
}

/// Template preparer over the configured repositories
pub(crate) fn template_preparer(config: &Config) -> TemplatePreparer {
    TemplatePreparer::new(
        SnapshotFetcher::new(config.general.posture),
        ConfigManager::templates_dir(),
        &config.template,
        config.build.msbuild.clone(),
    )
}

/// The canonical build template directory, if any repos are configured
pub(crate) fn template_dir(config: &Config) -> Option<PathBuf> {
    config
        .template
        .repos
        .last()
        .map(|repo| ConfigManager::templates_dir().join(&repo.repo))
}
