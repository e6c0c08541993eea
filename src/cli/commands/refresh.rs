//! Refresh command - force a catalog reload, ignoring the TTL

use crate::catalog::source::DOWNLOAD_LOCK;
use crate::cli::commands::{catalog_cache, lock_manager};
use crate::config::Config;
use crate::error::ForgeResult;

/// Execute the refresh command
pub async fn execute(config: &Config) -> ForgeResult<()> {
    let locks = lock_manager(config);

    // A marker left by a crashed run would stall the refetch
    locks.clear_stale_marker(DOWNLOAD_LOCK).await;

    let cache = catalog_cache(config, locks);
    match cache.refresh().await {
        Some(snap) => println!("Catalog refreshed: {} packages", snap.records.len()),
        None => println!("Refresh failed; catalog unavailable (see logs)"),
    }

    Ok(())
}
