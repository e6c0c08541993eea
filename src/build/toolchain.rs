//! External build toolchain invocation
//!
//! MSBuild is run as a subprocess against the staged workspace. Success is
//! validated by scanning the captured output for a literal marker string,
//! not by exit code alone: the toolchain has been observed exiting zero
//! after silent partial failures.

use crate::error::{ForgeError, ForgeResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved toolchain plus the invocation parameters shared by every
/// build
#[derive(Debug, Clone)]
pub struct Toolchain {
    msbuild: PathBuf,
    solution: String,
    configuration: String,
    success_marker: String,
    timeout: Duration,
}

impl Toolchain {
    pub fn new(
        msbuild: PathBuf,
        solution: impl Into<String>,
        configuration: impl Into<String>,
        success_marker: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            msbuild,
            solution: solution.into(),
            configuration: configuration.into(),
            success_marker: success_marker.into(),
            timeout,
        }
    }

    /// Resolve the msbuild executable: an explicit config path wins,
    /// otherwise probe well-known install locations and PATH
    pub async fn find_msbuild(explicit: Option<PathBuf>) -> ForgeResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }

        for candidate in msbuild_candidates() {
            if probe(&candidate, "-version").await {
                info!("Found msbuild at {}", candidate.display());
                return Ok(candidate);
            }
        }

        Err(ForgeError::ToolchainNotFound {
            name: "msbuild".to_string(),
            hint: "Ensure Visual Studio is installed or msbuild is on PATH".to_string(),
        })
    }

    /// Run a release build in `project_dir`, returning the combined
    /// stdout/stderr on success.
    pub async fn run_build(&self, project_dir: &Path) -> ForgeResult<String> {
        let mut cmd = Command::new(&self.msbuild);
        cmd.arg(&self.solution)
            .arg(format!("/p:Configuration={}", self.configuration))
            .arg("/p:Platform=Any CPU")
            .arg("/m")
            .arg("/p:BuildInParallel=true")
            .arg("/p:PreferredToolArchitecture=x64")
            .arg("/nologo")
            .arg("/verbosity:minimal")
            .arg("/p:DeployOnBuild=true")
            .arg("/p:AllowedReferenceRelatedFileExtensions=none")
            .arg("/p:GenerateSerializationAssemblies=Off")
            .arg("/p:TreatWarningsAsErrors=false")
            .arg("/p:AutoGenerateBindingRedirects=true")
            .current_dir(project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Running {} {} in {}",
            self.msbuild.display(),
            self.solution,
            project_dir.display()
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ForgeError::BuildTimeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                ForgeError::build_spawn(format!("{} {}", self.msbuild.display(), self.solution), e)
            })?;

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            warn!("Toolchain exited with {}", output.status);
            return Err(ForgeError::build_failed(
                format!("toolchain exited with {}", output.status),
                combined,
            ));
        }

        if !combined.contains(&self.success_marker) {
            // zero exit but the artifact line never appeared
            warn!("Toolchain output missing success marker '{}'", self.success_marker);
            return Err(ForgeError::build_failed(
                format!("success marker '{}' missing from output", self.success_marker),
                combined,
            ));
        }

        Ok(combined)
    }
}

/// Well-known msbuild locations, most recent Visual Studio first
fn msbuild_candidates() -> Vec<PathBuf> {
    #[cfg(windows)]
    {
        let mut candidates: Vec<PathBuf> = [
            r"C:\Program Files\Microsoft Visual Studio\2022\Community\MSBuild\Current\Bin\MSBuild.exe",
            r"C:\Program Files\Microsoft Visual Studio\2022\Enterprise\MSBuild\Current\Bin\MSBuild.exe",
            r"C:\Program Files\Microsoft Visual Studio\2022\Professional\MSBuild\Current\Bin\MSBuild.exe",
            r"C:\Program Files (x86)\Microsoft Visual Studio\2019\Enterprise\MSBuild\Current\Bin\MSBuild.exe",
            r"C:\Program Files (x86)\Microsoft Visual Studio\2019\Professional\MSBuild\Current\Bin\MSBuild.exe",
            r"C:\Program Files (x86)\Microsoft Visual Studio\2019\Community\MSBuild\Current\Bin\MSBuild.exe",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect();
        candidates.push(PathBuf::from("msbuild"));
        candidates
    }
    #[cfg(not(windows))]
    {
        vec![PathBuf::from("msbuild")]
    }
}

/// Whether a candidate executable answers the given probe argument
pub(crate) async fn probe(candidate: &Path, arg: &str) -> bool {
    let result = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(candidate)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await;

    matches!(result, Ok(Ok(status)) if status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn explicit_msbuild_path_wins() {
        let path = Toolchain::find_msbuild(Some(PathBuf::from("/opt/msbuild")))
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/opt/msbuild"));
    }

    #[cfg(unix)]
    fn fake_msbuild(dir: &Path, script_body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-msbuild");
        std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn toolchain(msbuild: PathBuf, timeout: Duration) -> Toolchain {
        Toolchain::new(
            msbuild,
            "SetupForge.sln",
            "Release",
            "bin\\Release\\SetupForge.exe",
            timeout,
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_succeeds_when_marker_present() {
        let dir = TempDir::new().unwrap();
        let msbuild = fake_msbuild(
            dir.path(),
            r#"echo 'SetupForge -> bin\Release\SetupForge.exe'"#,
        );

        let output = toolchain(msbuild, Duration::from_secs(5))
            .run_build(dir.path())
            .await
            .unwrap();
        assert!(output.contains("bin\\Release\\SetupForge.exe"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_without_marker_is_failure() {
        let dir = TempDir::new().unwrap();
        let msbuild = fake_msbuild(dir.path(), "echo 'Build completed'");

        let result = toolchain(msbuild, Duration::from_secs(5))
            .run_build(dir.path())
            .await;

        match result {
            Err(ForgeError::BuildFailed { reason, output }) => {
                assert!(reason.contains("success marker"));
                assert!(output.contains("Build completed"));
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure_with_output() {
        let dir = TempDir::new().unwrap();
        let msbuild = fake_msbuild(dir.path(), "echo 'error MSB1009' >&2; exit 1");

        let result = toolchain(msbuild, Duration::from_secs(5))
            .run_build(dir.path())
            .await;

        match result {
            Err(ForgeError::BuildFailed { output, .. }) => {
                assert!(output.contains("MSB1009"));
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_toolchain_times_out() {
        let dir = TempDir::new().unwrap();
        let msbuild = fake_msbuild(dir.path(), "sleep 30");

        let result = toolchain(msbuild, Duration::from_millis(200))
            .run_build(dir.path())
            .await;

        assert!(matches!(result, Err(ForgeError::BuildTimeout { .. })));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let tc = Toolchain::new(
            dir.path().join("does-not-exist"),
            "App.sln",
            "Release",
            "marker",
            Duration::from_secs(5),
        );

        let result = tc.run_build(dir.path()).await;
        assert!(matches!(result, Err(ForgeError::BuildSpawn { .. })));
    }
}
