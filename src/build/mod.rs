//! Per-request installer build pipeline
//!
//! Stages an isolated workspace from the canonical template, writes the
//! request's build instructions into it, runs the toolchain, delivers the
//! produced artifact, and reclaims the workspace with retrying cleanup.
//! Nothing here is serialized across requests; each build owns its
//! workspace and runs fully in parallel with others.

pub mod actions;
pub mod archive;
pub mod filename;
pub mod prepare;
pub mod toolchain;
pub mod workspace;

pub use actions::{plan_install_actions, PackageSelection, SetupAction};
pub use filename::installer_filename;
pub use prepare::TemplatePreparer;
pub use toolchain::Toolchain;
pub use workspace::BuildWorkspace;

use crate::config::schema::BuildConfig;
use crate::error::{ForgeError, ForgeResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Well-known instructions file name inside the project directory
pub const INSTRUCTIONS_FILE: &str = "main-action.json";

/// How the build result is handed back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactDelivery {
    /// The single installer executable
    Installer,
    /// The whole output directory, streamed into a zip archive
    ZippedOutputDir,
}

/// A finished build
#[derive(Debug)]
pub struct BuiltArtifact {
    /// Delivered file in the output directory
    pub path: PathBuf,

    /// Generated download filename
    pub file_name: String,

    /// Whether the workspace was reclaimed; `false` means manual cleanup
    /// was logged, never a failed build
    pub workspace_cleaned: bool,
}

/// Builds installers from package selections
pub struct BuildPipeline {
    template_dir: PathBuf,
    output_dir: PathBuf,
    project_dir: String,
    solution: String,
    configuration: String,
    artifact: String,
    success_marker: String,
    msbuild: Option<PathBuf>,
    timeout: Duration,
    cleanup_attempts: u32,
    cleanup_backoff: Duration,
}

impl BuildPipeline {
    /// Create a pipeline over the prepared template at `template_dir`,
    /// delivering artifacts into `output_dir`
    pub fn new(template_dir: PathBuf, output_dir: PathBuf, build: &BuildConfig) -> Self {
        Self {
            template_dir,
            output_dir,
            project_dir: build.project_dir.clone(),
            solution: build.solution.clone(),
            configuration: build.configuration.clone(),
            artifact: build.artifact.clone(),
            success_marker: build.success_marker.clone(),
            msbuild: build.msbuild.clone(),
            timeout: Duration::from_secs(build.timeout_secs),
            cleanup_attempts: build.cleanup_attempts,
            cleanup_backoff: Duration::from_secs(2),
        }
    }

    /// Override the cleanup back-off unit (tests)
    pub fn with_cleanup_backoff(mut self, backoff: Duration) -> Self {
        self.cleanup_backoff = backoff;
        self
    }

    /// Build one installer for `selections`.
    ///
    /// The empty selection is rejected before any workspace exists on
    /// disk. The workspace is always reclaimed (best-effort) whether the
    /// build succeeded or not.
    pub async fn build(
        &self,
        selections: &[PackageSelection],
        delivery: ArtifactDelivery,
    ) -> ForgeResult<BuiltArtifact> {
        let plan = plan_install_actions(selections)?;

        let msbuild = Toolchain::find_msbuild(self.msbuild.clone()).await?;
        let toolchain = Toolchain::new(
            msbuild,
            self.solution.clone(),
            self.configuration.clone(),
            self.success_marker.clone(),
            self.timeout,
        );

        let workspace = BuildWorkspace::stage(&self.template_dir).await?;
        info!(
            "Building installer for {} packages in workspace {}",
            selections.len(),
            workspace.token()
        );

        let produced = self
            .produce(&workspace, &plan, &toolchain, selections, delivery)
            .await;

        // Cleanup runs on success and failure alike; the artifact (if
        // any) already lives outside the workspace by now.
        let workspace_cleaned = workspace
            .remove(self.cleanup_attempts, self.cleanup_backoff)
            .await;

        let (path, file_name) = produced?;
        Ok(BuiltArtifact {
            path,
            file_name,
            workspace_cleaned,
        })
    }

    async fn produce(
        &self,
        workspace: &BuildWorkspace,
        plan: &SetupAction,
        toolchain: &Toolchain,
        selections: &[PackageSelection],
        delivery: ArtifactDelivery,
    ) -> ForgeResult<(PathBuf, String)> {
        let project_dir = workspace.root().join(&self.project_dir);

        let instructions_path = project_dir.join(INSTRUCTIONS_FILE);
        let payload = serde_json::to_vec_pretty(plan)?;
        fs::write(&instructions_path, payload).await.map_err(|e| {
            ForgeError::io(
                format!("writing instructions {}", instructions_path.display()),
                e,
            )
        })?;
        debug!("Wrote build instructions to {}", instructions_path.display());

        let output = toolchain.run_build(&project_dir).await?;
        debug!("Toolchain produced {} bytes of output", output.len());

        let out_dir = project_dir.join("bin").join(&self.configuration);
        let artifact_path = out_dir.join(&self.artifact);
        if !fs::try_exists(&artifact_path).await.unwrap_or(false) {
            return Err(ForgeError::ArtifactMissing(artifact_path));
        }

        fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            ForgeError::io(format!("creating directory {}", self.output_dir.display()), e)
        })?;

        let names: Vec<String> = selections.iter().map(|s| s.name.clone()).collect();
        let file_name = installer_filename(&names);

        match delivery {
            ArtifactDelivery::Installer => {
                let dest = self.output_dir.join(&file_name);
                fs::copy(&artifact_path, &dest).await.map_err(|e| {
                    ForgeError::io(
                        format!(
                            "copying artifact {} to {}",
                            artifact_path.display(),
                            dest.display()
                        ),
                        e,
                    )
                })?;
                info!("Installer ready at {}", dest.display());
                Ok((dest, file_name))
            }
            ArtifactDelivery::ZippedOutputDir => {
                let zip_name = format!("{}.zip", file_name.trim_end_matches(".exe"));
                let dest = self.output_dir.join(&zip_name);
                archive::archive_directory(&out_dir, &dest).await?;
                info!("Zipped build output ready at {}", dest.display());
                Ok((dest, zip_name))
            }
        }
    }
}
