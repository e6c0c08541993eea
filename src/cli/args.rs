//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// setupforge - catalog sync and installer build engine
///
/// Keeps a deduplicated WinGet package catalog warm and builds custom
/// installer bundles from package selections.
#[derive(Parser, Debug)]
#[command(name = "setupforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SETUPFORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prime the catalog cache and prepare build templates (startup task)
    Prime(PrimeArgs),

    /// Force a catalog refresh, ignoring the TTL
    Refresh,

    /// Show catalog cache status and contents
    Catalog(CatalogArgs),

    /// Download a repository snapshot
    Fetch(FetchArgs),

    /// Prepare the build-template repositories (one-time)
    Prepare,

    /// Build an installer for a set of packages
    Build(BuildArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the prime command
#[derive(Parser, Debug)]
pub struct PrimeArgs {
    /// Skip the build-template preparation, prime only the catalog
    #[arg(long)]
    pub catalog_only: bool,
}

/// Arguments for the catalog command
#[derive(Parser, Debug)]
pub struct CatalogArgs {
    /// Subcommand for catalog
    #[command(subcommand)]
    pub action: Option<CatalogAction>,
}

/// Catalog subcommands
#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Show snapshot age and package count
    Info,

    /// List packages from the current snapshot
    Show {
        /// Maximum packages to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Branch to snapshot
    #[arg(short, long, default_value = "master")]
    pub branch: String,

    /// Destination parent directory (defaults to the catalog state dir)
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// Environment variable holding a bearer token for private repos
    #[arg(long)]
    pub token_env: Option<String>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Package to include, as `id` or `id=Display Name` (repeatable)
    #[arg(short, long = "package", value_parser = parse_package_spec, required = true)]
    pub packages: Vec<(String, String)>,

    /// Deliver the whole build output directory as a zip archive
    #[arg(long)]
    pub zip: bool,

    /// Output directory for the delivered artifact
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Parse a package spec in `id` or `id=name` form
fn parse_package_spec(s: &str) -> Result<(String, String), String> {
    if s.trim().is_empty() {
        return Err("package id must not be empty".to_string());
    }
    match s.split_once('=') {
        Some((id, name)) if !id.trim().is_empty() && !name.trim().is_empty() => {
            Ok((id.trim().to_string(), name.trim().to_string()))
        }
        Some(_) => Err(format!("invalid package spec '{s}'. Use id or id=Name")),
        None => Ok((s.trim().to_string(), s.trim().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_package_spec_id_only() {
        let (id, name) = parse_package_spec("Mozilla.Firefox").unwrap();
        assert_eq!(id, "Mozilla.Firefox");
        assert_eq!(name, "Mozilla.Firefox");
    }

    #[test]
    fn parse_package_spec_with_name() {
        let (id, name) = parse_package_spec("Mozilla.Firefox=Firefox").unwrap();
        assert_eq!(id, "Mozilla.Firefox");
        assert_eq!(name, "Firefox");
    }

    #[test]
    fn parse_package_spec_name_keeps_inner_equals() {
        let (id, name) = parse_package_spec("Vendor.App=App = Pro").unwrap();
        assert_eq!(id, "Vendor.App");
        assert_eq!(name, "App = Pro");
    }

    #[test]
    fn parse_package_spec_empty_rejected() {
        assert!(parse_package_spec("").is_err());
        assert!(parse_package_spec("=Name").is_err());
        assert!(parse_package_spec("Id=").is_err());
    }

    #[test]
    fn cli_parses_build() {
        let cli = Cli::parse_from([
            "setupforge",
            "build",
            "--package",
            "Mozilla.Firefox=Firefox",
            "--package",
            "Valve.Steam",
            "--zip",
        ]);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.packages.len(), 2);
                assert_eq!(args.packages[0].1, "Firefox");
                assert_eq!(args.packages[1].0, "Valve.Steam");
                assert!(args.zip);
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn cli_parses_prime() {
        let cli = Cli::parse_from(["setupforge", "prime"]);
        match cli.command {
            Commands::Prime(args) => assert!(!args.catalog_only),
            _ => panic!("expected Prime command"),
        }
    }

    #[test]
    fn cli_parses_prime_catalog_only() {
        let cli = Cli::parse_from(["setupforge", "prime", "--catalog-only"]);
        match cli.command {
            Commands::Prime(args) => assert!(args.catalog_only),
            _ => panic!("expected Prime command"),
        }
    }

    #[test]
    fn cli_parses_fetch() {
        let cli = Cli::parse_from([
            "setupforge",
            "fetch",
            "microsoft",
            "winget-pkgs",
            "--branch",
            "main",
        ]);
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.owner, "microsoft");
                assert_eq!(args.repo, "winget-pkgs");
                assert_eq!(args.branch, "main");
            }
            _ => panic!("expected Fetch command"),
        }
    }

    #[test]
    fn cli_parses_catalog_show_limit() {
        let cli = Cli::parse_from(["setupforge", "catalog", "show", "--limit", "5"]);
        match cli.command {
            Commands::Catalog(args) => match args.action {
                Some(CatalogAction::Show { limit }) => assert_eq!(limit, 5),
                _ => panic!("expected Show action"),
            },
            _ => panic!("expected Catalog command"),
        }
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["setupforge", "refresh"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["setupforge", "-vv", "refresh"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn build_requires_a_package() {
        let result = Cli::try_parse_from(["setupforge", "build"]);
        assert!(result.is_err());
    }
}
