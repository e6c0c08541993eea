//! Fetch command - download a repository snapshot

use crate::cli::args::FetchArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{ForgeError, ForgeResult};
use crate::fetch::{RepoSpec, SnapshotFetcher};

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> ForgeResult<()> {
    let token = match &args.token_env {
        Some(var) => Some(
            std::env::var(var)
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ForgeError::MissingSecret(var.clone()))?,
        ),
        None => None,
    };

    let spec = RepoSpec::new(&args.owner, &args.repo, &args.branch).with_token(token);
    let dest_parent = args.dest.unwrap_or_else(ConfigManager::catalog_dir);

    let fetcher = SnapshotFetcher::new(config.general.posture);
    fetcher.fetch(&spec, &dest_parent).await?;

    println!("Snapshot ready at {}", dest_parent.join(&args.repo).display());
    Ok(())
}
