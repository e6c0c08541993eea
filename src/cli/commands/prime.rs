//! Prime command - startup initialization of catalog and templates

use crate::cli::args::PrimeArgs;
use crate::cli::commands::{catalog_cache, lock_manager, template_preparer};
use crate::config::Config;
use crate::error::ForgeResult;
use tracing::info;

/// Lock name ensuring a single initialization across server starts
pub const INIT_LOCK: &str = "server-initialization";

/// Execute the prime command
pub async fn execute(args: PrimeArgs, config: &Config) -> ForgeResult<()> {
    let locks = lock_manager(config);
    let cache = catalog_cache(config, locks.clone());
    let preparer = template_preparer(config);

    info!("Starting initialization tasks");

    locks
        .with_lock(INIT_LOCK, || async {
            // Catalog priming and template preparation are independent;
            // run them concurrently like the server startup hook does.
            let (snapshot, prepared) = tokio::join!(cache.prime(), async {
                if args.catalog_only {
                    Ok(())
                } else {
                    preparer.prepare(locks.as_ref()).await
                }
            });

            match snapshot {
                Some(snap) => println!("Catalog ready: {} packages", snap.records.len()),
                None => println!("Catalog not ready; load failed (see logs)"),
            }
            prepared?;
            if !args.catalog_only {
                println!("Build templates prepared");
            }
            Ok(())
        })
        .await
}
