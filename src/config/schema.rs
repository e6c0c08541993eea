//! Configuration schema for setupforge
//!
//! Configuration is stored at `~/.config/setupforge/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Deployment posture. Development relaxes cross-process coordination:
/// pre-existing snapshot directories are trusted and stale lock markers
/// are removed instead of waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Development,
    Production,
}

impl Default for Posture {
    fn default() -> Self {
        Self::Production
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Lock manager settings
    pub lock: LockConfig,

    /// Package catalog settings
    pub catalog: CatalogConfig,

    /// Build template repositories
    pub template: TemplateConfig,

    /// Installer build settings
    pub build: BuildConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Deployment posture: "development" or "production"
    pub posture: Posture,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            posture: Posture::default(),
            log_format: "text".to_string(),
        }
    }
}

/// Lock manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Maximum time to wait for another process to release a lock
    pub wait_timeout_secs: u64,

    /// Interval between checks for a lock marker's disappearance
    pub poll_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 600,
            poll_interval_secs: 3,
        }
    }
}

/// Package catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Repository owner hosting the package manifests
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Branch to snapshot
    pub branch: String,

    /// Hours a durable catalog snapshot stays trusted
    pub ttl_hours: u64,

    /// Manifest files parsed concurrently per batch
    pub batch_size: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            owner: "microsoft".to_string(),
            repo: "winget-pkgs".to_string(),
            branch: "master".to_string(),
            ttl_hours: 24,
            batch_size: 100,
        }
    }
}

/// One build-template repository to download and prepare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRepo {
    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Branch to snapshot
    pub branch: String,

    /// Directory inside the repository holding the solution
    pub project_dir: String,

    /// Solution file restored and built during preparation
    pub solution: String,
}

/// Build template configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Environment variable holding the bearer token for private repos
    pub token_env: String,

    /// Private repositories staged during one-time preparation.
    /// The last entry is the template cloned per build request.
    pub repos: Vec<TemplateRepo>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            token_env: "SETUPFORGE_GITHUB_TOKEN".to_string(),
            repos: vec![
                TemplateRepo {
                    owner: "setupforge".to_string(),
                    repo: "FileUtility".to_string(),
                    branch: "master".to_string(),
                    project_dir: "FileUtility".to_string(),
                    solution: "FileUtility.sln".to_string(),
                },
                TemplateRepo {
                    owner: "setupforge".to_string(),
                    repo: "setupforge-winforms".to_string(),
                    branch: "master".to_string(),
                    project_dir: "SetupForge".to_string(),
                    solution: "SetupForge.sln".to_string(),
                },
            ],
        }
    }
}

/// Installer build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Project directory inside the template holding the solution
    pub project_dir: String,

    /// Solution file name passed to the toolchain
    pub solution: String,

    /// Build configuration to select
    pub configuration: String,

    /// Artifact file name produced by a successful build
    pub artifact: String,

    /// Literal marker the toolchain output must contain on success.
    /// Exit code alone is not trusted; this string is a contract the
    /// toolchain must preserve.
    pub success_marker: String,

    /// Explicit msbuild path (probed when unset)
    pub msbuild: Option<PathBuf>,

    /// Wall-clock bound for one toolchain invocation
    pub timeout_secs: u64,

    /// Attempts for the retrying workspace cleanup
    pub cleanup_attempts: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            project_dir: "SetupForge".to_string(),
            solution: "SetupForge.sln".to_string(),
            configuration: "Release".to_string(),
            artifact: "SetupForge.exe".to_string(),
            success_marker: "bin\\Release\\SetupForge.exe".to_string(),
            msbuild: None,
            timeout_secs: 30,
            cleanup_attempts: 10,
        }
    }
}
