//! Catalog command - inspect the cached catalog

use crate::cli::args::{CatalogAction, CatalogArgs};
use crate::cli::commands::{catalog_cache, lock_manager};
use crate::config::Config;
use crate::error::ForgeResult;
use chrono::Utc;

/// Execute the catalog command
pub async fn execute(args: CatalogArgs, config: &Config) -> ForgeResult<()> {
    let locks = lock_manager(config);
    let cache = catalog_cache(config, locks);

    let snapshot = match cache.get().await {
        Some(snapshot) => snapshot,
        None => {
            println!("Catalog not ready. Run: setupforge prime");
            return Ok(());
        }
    };

    match args.action {
        None | Some(CatalogAction::Info) => {
            let age = Utc::now().signed_duration_since(snapshot.fetched_at);
            println!("Packages:   {}", snapshot.records.len());
            println!("Fetched at: {}", snapshot.fetched_at.to_rfc3339());
            println!("Age:        {}h {}m", age.num_hours(), age.num_minutes() % 60);
        }
        Some(CatalogAction::Show { limit }) => {
            let mut records: Vec<_> = snapshot.records.iter().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            for record in records.into_iter().take(limit) {
                println!(
                    "{}  v{}  {} ({})",
                    record.id, record.version, record.name, record.publisher
                );
            }
        }
    }

    Ok(())
}
