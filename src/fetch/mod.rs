//! Remote repository snapshot retrieval
//!
//! Downloads a versioned zipball of a repository branch, streams it to a
//! temp file, extracts it, and promotes the extracted root to a canonical
//! destination name. Transport failures retry with linearly increasing
//! back-off; HTTP error statuses are terminal.

use crate::config::Posture;
use crate::error::{ForgeError, ForgeResult};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("setupforge/", env!("CARGO_PKG_VERSION"));
const GITHUB_API_VERSION: &str = "2022-11-28";

/// A repository branch to snapshot
#[derive(Debug, Clone)]
pub struct RepoSpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Bearer credential for restricted repositories
    pub token: Option<String>,
}

impl RepoSpec {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Zipball endpoint for this branch
    pub fn zipball_url(&self) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/zipball/{}",
            self.owner, self.repo, self.branch
        )
    }
}

/// Downloads and promotes repository snapshots
pub struct SnapshotFetcher {
    posture: Posture,
    max_attempts: u32,
    attempt_timeout: Duration,
    backoff_unit: Duration,
}

impl SnapshotFetcher {
    pub fn new(posture: Posture) -> Self {
        Self {
            posture,
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(30),
            backoff_unit: Duration::from_secs(2),
        }
    }

    /// Fetch `spec` into `dest_parent/<repo>`.
    ///
    /// Returns `true` when the snapshot is in place, whether downloaded
    /// now or already present. A pre-existing destination is trusted in
    /// development; in production it is unexpected (the caller should
    /// have held a lock preventing re-entry) and logged as an anomaly,
    /// but still treated as success rather than crashing a healthy
    /// server.
    pub async fn fetch(&self, spec: &RepoSpec, dest_parent: &Path) -> ForgeResult<bool> {
        let dest = dest_parent.join(&spec.repo);

        if fs::try_exists(&dest).await.unwrap_or(false) {
            match self.posture {
                Posture::Development => {
                    info!(
                        "Snapshot already exists at {}, skipping download",
                        dest.display()
                    );
                }
                Posture::Production => {
                    warn!(
                        "Snapshot directory {} already exists in production; \
                         continuing with the existing tree",
                        dest.display()
                    );
                }
            }
            return Ok(true);
        }

        fs::create_dir_all(dest_parent).await.map_err(|e| {
            ForgeError::io(format!("creating directory {}", dest_parent.display()), e)
        })?;

        let tmp_zip = std::env::temp_dir().join(format!("{}.zip", spec.repo));
        let url = spec.zipball_url();
        info!("Downloading snapshot {}", url);

        let result = self.download_and_promote(spec, &url, dest_parent, &tmp_zip).await;

        // The temp archive goes away on every path
        match fs::remove_file(&tmp_zip).await {
            Ok(()) => debug!("Removed temp archive {}", tmp_zip.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp archive {}: {}", tmp_zip.display(), e),
        }

        result?;
        info!("Snapshot ready at {}", dest.display());
        Ok(true)
    }

    async fn download_and_promote(
        &self,
        spec: &RepoSpec,
        url: &str,
        dest_parent: &Path,
        tmp_zip: &Path,
    ) -> ForgeResult<()> {
        self.download_zipball(spec, url, tmp_zip).await?;

        info!("Extracting {}", tmp_zip.display());
        let tmp_zip = tmp_zip.to_path_buf();
        let dest_parent = dest_parent.to_path_buf();
        let owner = spec.owner.clone();
        let repo = spec.repo.clone();
        tokio::task::spawn_blocking(move || {
            extract_and_promote(&tmp_zip, &dest_parent, &owner, &repo)
        })
        .await
        .map_err(|e| ForgeError::Internal(format!("extract task failed: {e}")))?
    }

    /// Stream the zipball to `tmp_zip`, retrying transient transport
    /// failures with attempt × back-off delays
    async fn download_zipball(&self, spec: &RepoSpec, url: &str, tmp_zip: &Path) -> ForgeResult<()> {
        let agent = self.agent();
        let result = retry_with_backoff(self.max_attempts, self.backoff_unit, |attempt| {
            let agent = agent.clone();
            let url = url.to_string();
            let token = spec.token.clone();
            let tmp_zip = tmp_zip.to_path_buf();
            async move {
                debug!("Download attempt {}", attempt);
                tokio::task::spawn_blocking(move || {
                    download_once(&agent, &url, token.as_deref(), &tmp_zip)
                })
                .await
                .map_err(|e| {
                    AttemptError::Terminal(ForgeError::Internal(format!(
                        "download task failed: {e}"
                    )))
                })?
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Terminal(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => Err(ForgeError::FetchTransport {
                url: url.to_string(),
                attempts,
                source: Box::new(last),
            }),
        }
    }

    fn agent(&self) -> ureq::Agent {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.attempt_timeout))
            .build();
        config.into()
    }
}

/// Why a single attempt failed
pub(crate) enum AttemptError<E> {
    /// Worth retrying (connection refused, timeout, reset mid-handshake)
    Transient(E),
    /// Not worth retrying (HTTP error status, local disk failure)
    Terminal(ForgeError),
}

/// How a retried operation ultimately failed
pub(crate) enum RetryError<E> {
    Terminal(ForgeError),
    Exhausted { attempts: u32, last: E },
}

/// Run `op` up to `max_attempts` times, sleeping attempt × `backoff_unit`
/// between transient failures
pub(crate) async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    backoff_unit: Duration,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Terminal(e)) => return Err(RetryError::Terminal(e)),
            Err(AttemptError::Transient(e)) => {
                warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                tokio::time::sleep(backoff_unit * attempt).await;
            }
        }
    }
}

/// One blocking download attempt: GET the zipball and stream the body to
/// `dest`. Never buffers the archive in memory; archives in this domain
/// run tens to low hundreds of MB.
fn download_once(
    agent: &ureq::Agent,
    url: &str,
    token: Option<&str>,
    dest: &Path,
) -> Result<(), AttemptError<ureq::Error>> {
    let mut request = agent
        .get(url)
        .header("User-Agent", USER_AGENT)
        .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
    if let Some(token) = token {
        let auth = format!("Bearer {token}");
        request = request.header("Authorization", auth.as_str());
    }

    match request.call() {
        Ok(mut response) => {
            let mut file = std::fs::File::create(dest).map_err(|e| {
                AttemptError::Terminal(ForgeError::io(
                    format!("creating temp archive {}", dest.display()),
                    e,
                ))
            })?;
            let mut reader = response.body_mut().as_reader();
            std::io::copy(&mut reader, &mut file).map_err(|e| {
                AttemptError::Terminal(ForgeError::io(
                    format!("streaming snapshot archive to {}", dest.display()),
                    e,
                ))
            })?;
            Ok(())
        }
        Err(ureq::Error::StatusCode(code)) => {
            // 4xx/5xx are terminal; log with response metadata
            tracing::error!("Remote responded with HTTP {} for {}", code, url);
            Err(AttemptError::Terminal(ForgeError::FetchStatus {
                url: url.to_string(),
                status: code,
            }))
        }
        Err(e) => Err(AttemptError::Transient(e)),
    }
}

/// Extract the archive into `dest_parent` and rename the owner-prefixed
/// top-level directory the zipball carries to the canonical repo name.
pub(crate) fn extract_and_promote(
    tmp_zip: &Path,
    dest_parent: &Path,
    owner: &str,
    repo: &str,
) -> ForgeResult<()> {
    let file = std::fs::File::open(tmp_zip)
        .map_err(|e| ForgeError::io(format!("opening archive {}", tmp_zip.display()), e))?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(dest_parent)?;

    let prefix = format!("{owner}-{repo}");
    let extracted_root = find_extracted_root(dest_parent, &prefix)?;

    match extracted_root {
        Some(root) => {
            let dest = dest_parent.join(repo);
            std::fs::rename(&root, &dest).map_err(|e| {
                ForgeError::io(
                    format!("renaming {} to {}", root.display(), dest.display()),
                    e,
                )
            })?;
            Ok(())
        }
        None => Err(ForgeError::ExtractedRootMissing {
            dir: dest_parent.to_path_buf(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        }),
    }
}

fn find_extracted_root(dest_parent: &Path, prefix: &str) -> ForgeResult<Option<PathBuf>> {
    let entries = std::fs::read_dir(dest_parent)
        .map_err(|e| ForgeError::io(format!("reading directory {}", dest_parent.display()), e))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| ForgeError::io("reading extracted directory entry", e))?;
        let name = entry.file_name();
        let is_match = name
            .to_str()
            .map(|n| n.starts_with(prefix))
            .unwrap_or(false);
        if is_match && entry.path().is_dir() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}
