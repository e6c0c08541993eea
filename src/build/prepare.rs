//! One-time build-template preparation
//!
//! Downloads the private template repositories, restores their packages,
//! runs an initial build so per-request builds start from a warm tree, and
//! prunes directories that would slow the per-request workspace copy.
//! Callers run this under the lock manager; concurrent server starts must
//! not prepare twice.

use crate::build::toolchain::{self, Toolchain};
use crate::config::schema::TemplateConfig;
use crate::config::TemplateRepo;
use crate::error::{ForgeError, ForgeResult};
use crate::fetch::{retry_with_backoff, AttemptError, RepoSpec, RetryError, SnapshotFetcher};
use crate::lock::LockProvider;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lock name guarding the one-time preparation
pub const PREPARE_LOCK: &str = "template-preparation";

/// What a preparation step's output must show for the step to count as
/// successful
#[derive(Debug, Clone, Copy)]
pub(crate) enum StepCheck {
    /// `nuget restore` reported packages installed (or already present)
    /// without errors
    NugetRestore,
    /// msbuild reported a successful build
    BuildSucceeded,
}

impl StepCheck {
    pub(crate) fn passes(&self, output: &str) -> bool {
        let lower = output.to_lowercase();
        match self {
            Self::NugetRestore => {
                !lower.contains("error")
                    && (lower.contains("installed:")
                        || output
                            .contains("All packages listed in packages.config are already installed"))
            }
            Self::BuildSucceeded => lower.contains("build succeeded"),
        }
    }
}

/// Stages and builds the template repositories
pub struct TemplatePreparer {
    fetcher: SnapshotFetcher,
    templates_dir: PathBuf,
    repos: Vec<TemplateRepo>,
    token_env: String,
    msbuild: Option<PathBuf>,
    nuget: Option<PathBuf>,
    step_attempts: u32,
    step_backoff: Duration,
    step_timeout: Duration,
}

impl TemplatePreparer {
    pub fn new(
        fetcher: SnapshotFetcher,
        templates_dir: PathBuf,
        template: &TemplateConfig,
        msbuild: Option<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            templates_dir,
            repos: template.repos.clone(),
            token_env: template.token_env.clone(),
            msbuild,
            nuget: None,
            step_attempts: 3,
            step_backoff: Duration::from_secs(5),
            step_timeout: Duration::from_secs(300),
        }
    }

    /// Override tool paths and step retry policy (tests)
    pub fn with_tools(mut self, msbuild: Option<PathBuf>, nuget: Option<PathBuf>) -> Self {
        self.msbuild = msbuild;
        self.nuget = nuget;
        self
    }

    /// Override the step retry policy (tests)
    pub fn with_step_policy(
        mut self,
        attempts: u32,
        backoff: Duration,
        timeout: Duration,
    ) -> Self {
        self.step_attempts = attempts;
        self.step_backoff = backoff;
        self.step_timeout = timeout;
        self
    }

    /// Prepare all template repositories under the preparation lock
    pub async fn prepare(&self, locks: &dyn LockProvider) -> ForgeResult<()> {
        locks
            .with_lock_boxed(PREPARE_LOCK, Box::pin(self.prepare_inner()))
            .await
    }

    async fn prepare_inner(&self) -> ForgeResult<()> {
        if self.repos.is_empty() {
            info!("No template repositories configured, nothing to prepare");
            return Ok(());
        }

        let token = std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ForgeError::MissingSecret(self.token_env.clone()))?;

        let result = self.download_and_build(&token).await;
        if result.is_err() {
            // Partially staged repositories would poison the next run
            self.cleanup_partial().await;
        }
        result
    }

    async fn download_and_build(&self, token: &str) -> ForgeResult<()> {
        for repo in &self.repos {
            info!("Staging template repository {}/{}", repo.owner, repo.repo);
            let spec = RepoSpec::new(&repo.owner, &repo.repo, &repo.branch)
                .with_token(Some(token.to_string()));
            self.fetcher.fetch(&spec, &self.templates_dir).await?;
        }

        let msbuild = Toolchain::find_msbuild(self.msbuild.clone()).await?;
        let nuget = self.find_nuget().await?;

        for repo in &self.repos {
            let project_dir = self.templates_dir.join(&repo.repo).join(&repo.project_dir);

            self.run_step(
                &format!("{}-restore", repo.repo),
                &nuget,
                &["restore".to_string()],
                &project_dir,
                StepCheck::NugetRestore,
            )
            .await?;

            self.run_step(
                &format!("{}-build", repo.repo),
                &msbuild,
                &[
                    repo.solution.clone(),
                    "/p:Configuration=Release".to_string(),
                    "/p:Platform=Any CPU".to_string(),
                ],
                &project_dir,
                StepCheck::BuildSucceeded,
            )
            .await?;
        }

        if let Some(repo) = self.repos.last() {
            self.prune_clone_template(repo).await?;
        }

        info!("Template preparation complete");
        Ok(())
    }

    /// Run one external step with bounded retry; any failure (spawn,
    /// timeout, exit status, validation) is retried until the bound.
    async fn run_step(
        &self,
        name: &str,
        program: &Path,
        args: &[String],
        cwd: &Path,
        check: StepCheck,
    ) -> ForgeResult<()> {
        if !cwd.is_dir() {
            return Err(ForgeError::PathNotFound(cwd.to_path_buf()));
        }
        info!("Running step {name}: {} {}", program.display(), args.join(" "));

        let result = retry_with_backoff(self.step_attempts, self.step_backoff, |attempt| {
            let program = program.to_path_buf();
            let args = args.to_vec();
            let cwd = cwd.to_path_buf();
            async move {
                debug!("Step attempt {attempt}");
                match run_command(&program, &args, &cwd, self.step_timeout).await {
                    Ok(output) if check.passes(&output) => Ok(()),
                    Ok(output) => Err(AttemptError::Transient(format!(
                        "output validation failed: {}",
                        truncate(&output, 500)
                    ))),
                    Err(e) => Err(AttemptError::Transient(e)),
                }
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!("Step {name} succeeded");
                Ok(())
            }
            Err(RetryError::Terminal(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => Err(ForgeError::build_failed(
                format!("step {name} failed after {attempts} attempts"),
                last,
            )),
        }
    }

    async fn find_nuget(&self) -> ForgeResult<PathBuf> {
        if let Some(path) = &self.nuget {
            return Ok(path.clone());
        }

        for candidate in self.nuget_candidates() {
            if toolchain::probe(&candidate, "help").await {
                info!("Found nuget at {}", candidate.display());
                return Ok(candidate);
            }
        }

        Err(ForgeError::ToolchainNotFound {
            name: "nuget".to_string(),
            hint: "Ensure NuGet is installed and available".to_string(),
        })
    }

    fn nuget_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if cfg!(windows) {
            candidates.push(self.templates_dir.join("nuget.exe"));
        }
        candidates.push(PathBuf::from("nuget"));
        candidates
    }

    /// Remove version-control droppings and stale build output from the
    /// clone template; they only slow the per-request deep copy.
    async fn prune_clone_template(&self, repo: &TemplateRepo) -> ForgeResult<()> {
        let repo_dir = self.templates_dir.join(&repo.repo);
        let project_dir = repo_dir.join(&repo.project_dir);

        let dirs = [
            project_dir.join("obj"),
            project_dir.join("bin"),
            repo_dir.join(".git"),
            repo_dir.join(".vs"),
        ];
        for dir in &dirs {
            match fs::remove_dir_all(dir).await {
                Ok(()) => debug!("Pruned {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to prune {}: {}", dir.display(), e);
                    // Stale build output would leak into every request's
                    // workspace; everything else is merely slow.
                    if dir.ends_with("bin") {
                        return Err(ForgeError::io(
                            format!("pruning stale build output {}", dir.display()),
                            e,
                        ));
                    }
                }
            }
        }

        let files = [
            project_dir.join("README.md"),
            project_dir.join(".gitignore"),
            project_dir.join(".gitattributes"),
        ];
        for file in &files {
            match fs::remove_file(file).await {
                Ok(()) => debug!("Pruned {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to prune {}: {}", file.display(), e),
            }
        }

        Ok(())
    }

    /// Best-effort removal of partially staged repositories
    async fn cleanup_partial(&self) {
        for repo in &self.repos {
            let dir = self.templates_dir.join(&repo.repo);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => info!("Removed partially staged {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
            }
        }
    }
}

/// Run a command to completion with a wall-clock bound, returning
/// combined stdout/stderr
async fn run_command(
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<String, String> {
    let result = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
        Ok(Err(e)) => Err(format!("failed to start: {e}")),
        Ok(Ok(output)) => {
            let combined = format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            if output.status.success() {
                Ok(combined)
            } else {
                Err(format!(
                    "exited with {}: {}",
                    output.status,
                    truncate(&combined, 500)
                ))
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.trim().to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}
