//! Error types for setupforge
//!
//! All modules use `ForgeResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for setupforge operations
pub type ForgeResult<T> = Result<T, ForgeError>;

/// All errors that can occur in setupforge
#[derive(Error, Debug)]
pub enum ForgeError {
    // Validation errors (rejected before any I/O)
    #[error("Invalid lock name '{0}'. Names may only contain letters, digits, dashes and underscores.")]
    LockName(String),

    #[error("No packages selected for installation")]
    EmptySelection,

    // Lock errors
    #[error("Lock '{name}' execution failed: {message}")]
    LockFailed { name: String, message: String },

    // Fetch errors
    #[error("Download failed after {attempts} attempts: {url}")]
    FetchTransport {
        url: String,
        attempts: u32,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("Remote responded with HTTP {status}: {url}")]
    FetchStatus { url: String, status: u16 },

    #[error("No extracted root directory found under {dir} for {owner}/{repo}")]
    ExtractedRootMissing {
        dir: PathBuf,
        owner: String,
        repo: String,
    },

    // Catalog errors
    #[error("Manifests directory not found: {0}")]
    ManifestsDirMissing(PathBuf),

    // Build errors
    #[error("Build template not found: {0}")]
    TemplateMissing(PathBuf),

    #[error("Toolchain not found: {name}. {hint}")]
    ToolchainNotFound { name: String, hint: String },

    #[error("Build command failed to start: {command}")]
    BuildSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build timed out after {secs}s")]
    BuildTimeout { secs: u64 },

    #[error("Build failed: {reason}")]
    BuildFailed { reason: String, output: String },

    #[error("Built artifact not found at {0}")]
    ArtifactMissing(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable {0} is required but not set")]
    MissingSecret(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a build spawn error
    pub fn build_spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::BuildSpawn {
            command: command.into(),
            source,
        }
    }

    /// Create a build failure carrying captured toolchain output
    pub fn build_failed(reason: impl Into<String>, output: impl Into<String>) -> Self {
        Self::BuildFailed {
            reason: reason.into(),
            output: output.into(),
        }
    }

    /// Whether this error was produced before any I/O was attempted
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::LockName(_) | Self::EmptySelection)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolchainNotFound { .. } => {
                Some("Install Visual Studio Build Tools or put msbuild on PATH")
            }
            Self::MissingSecret(_) => {
                Some("Export the token before starting: export SETUPFORGE_GITHUB_TOKEN=...")
            }
            Self::TemplateMissing(_) => Some("Run: setupforge prepare"),
            _ => None,
        }
    }
}
