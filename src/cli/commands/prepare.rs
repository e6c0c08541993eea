//! Prepare command - one-time build-template preparation

use crate::cli::commands::{lock_manager, template_preparer};
use crate::config::Config;
use crate::error::ForgeResult;

/// Execute the prepare command
pub async fn execute(config: &Config) -> ForgeResult<()> {
    let locks = lock_manager(config);
    let preparer = template_preparer(config);

    preparer.prepare(locks.as_ref()).await?;

    println!("Build templates prepared");
    Ok(())
}
