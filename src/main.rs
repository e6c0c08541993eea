//! setupforge - catalog sync and installer build engine
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use setupforge::cli::{Cli, Commands};
use setupforge::config::ConfigManager;
use setupforge::error::ForgeResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ForgeResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("setupforge=warn"),
        1 => EnvFilter::new("setupforge=info"),
        _ => EnvFilter::new("setupforge=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // Ensure state directories exist
    ConfigManager::ensure_state_dirs().await?;

    // Dispatch to command
    match cli.command {
        Commands::Prime(args) => setupforge::cli::commands::prime(args, &config).await,
        Commands::Refresh => setupforge::cli::commands::refresh(&config).await,
        Commands::Catalog(args) => setupforge::cli::commands::catalog(args, &config).await,
        Commands::Fetch(args) => setupforge::cli::commands::fetch(args, &config).await,
        Commands::Prepare => setupforge::cli::commands::prepare(&config).await,
        Commands::Build(args) => setupforge::cli::commands::build(args, &config).await,
        Commands::Config(args) => setupforge::cli::commands::config(args, &config).await,
    }
}
