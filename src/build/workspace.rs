//! Isolated build workspaces
//!
//! Each build request stages its own deep copy of the canonical template;
//! the toolchain mutates files inside it, so the copy is real, never a
//! link farm. Deletion retries with back-off because a just-exited
//! subprocess can hold file locks slightly past its own termination.

use crate::error::{ForgeError, ForgeResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// An isolated, disposable copy of the build template
pub struct BuildWorkspace {
    token: String,
    root: PathBuf,
}

impl BuildWorkspace {
    /// Stage a new workspace as a sibling of `template`, suffixed with a
    /// random process-unique token
    pub async fn stage(template: &Path) -> ForgeResult<Self> {
        if !template.is_dir() {
            return Err(ForgeError::TemplateMissing(template.to_path_buf()));
        }

        let token = Uuid::new_v4().simple().to_string();
        let template_name = template
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ForgeError::TemplateMissing(template.to_path_buf()))?;
        let parent = template
            .parent()
            .ok_or_else(|| ForgeError::TemplateMissing(template.to_path_buf()))?;
        let root = parent.join(format!("{template_name}-{token}"));

        debug!("Staging workspace {}", root.display());
        let src = template.to_path_buf();
        let dst = root.clone();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| ForgeError::Internal(format!("workspace copy task failed: {e}")))??;

        info!("Workspace staged at {}", root.display());
        Ok(Self { token, root })
    }

    /// The random token identifying this workspace
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Root directory of the isolated copy
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete the workspace, retrying with attempt × `backoff_unit`
    /// delays up to `attempts` times.
    ///
    /// Returns whether the directory is gone. Exhausting the retries is
    /// logged as requiring manual cleanup but never fails the build whose
    /// artifact was already retrieved.
    pub async fn remove(self, attempts: u32, backoff_unit: Duration) -> bool {
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            match fs::remove_dir_all(&self.root).await {
                Ok(()) => {
                    debug!("Workspace {} removed", self.root.display());
                    return true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
                Err(e) => {
                    warn!(
                        "Workspace cleanup attempt {}/{} failed for {}: {} ({:?})",
                        attempt,
                        attempts,
                        self.root.display(),
                        e,
                        e.kind()
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff_unit * attempt).await;
                    }
                }
            }
        }

        error!(
            "Workspace {} could not be removed; manual cleanup required",
            self.root.display()
        );
        false
    }
}

/// Recursive deep copy of a directory tree
fn copy_tree(src: &Path, dst: &Path) -> ForgeResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            ForgeError::Internal(format!("walking template {}: {e}", src.display()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ForgeError::Internal(format!("relativizing template path: {e}")))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| ForgeError::io(format!("creating {}", target.display()), e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                ForgeError::io(
                    format!(
                        "copying {} to {}",
                        entry.path().display(),
                        target.display()
                    ),
                    e,
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_template(dir: &Path) -> PathBuf {
        let template = dir.join("template");
        std::fs::create_dir_all(template.join("Project/nested")).unwrap();
        std::fs::write(template.join("Project/app.sln"), "solution").unwrap();
        std::fs::write(template.join("Project/nested/file.cs"), "code").unwrap();
        template
    }

    #[tokio::test]
    async fn stage_copies_whole_tree() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path());

        let ws = BuildWorkspace::stage(&template).await.unwrap();

        assert!(ws.root().starts_with(dir.path()));
        assert_ne!(ws.root(), template);
        assert!(ws.root().join("Project/app.sln").exists());
        assert!(ws.root().join("Project/nested/file.cs").exists());
        // a true copy: mutating the workspace leaves the template alone
        std::fs::write(ws.root().join("Project/app.sln"), "mutated").unwrap();
        assert_eq!(
            std::fs::read_to_string(template.join("Project/app.sln")).unwrap(),
            "solution"
        );
    }

    #[tokio::test]
    async fn stage_missing_template_fails() {
        let dir = TempDir::new().unwrap();
        let result = BuildWorkspace::stage(&dir.path().join("nope")).await;
        assert!(matches!(result, Err(ForgeError::TemplateMissing(_))));
    }

    #[tokio::test]
    async fn tokens_are_process_unique() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path());

        let a = BuildWorkspace::stage(&template).await.unwrap();
        let b = BuildWorkspace::stage(&template).await.unwrap();

        assert_ne!(a.token(), b.token());
        assert_ne!(a.root(), b.root());
    }

    #[tokio::test]
    async fn remove_deletes_workspace() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path());
        let ws = BuildWorkspace::stage(&template).await.unwrap();
        let root = ws.root().to_path_buf();

        assert!(ws.remove(3, Duration::from_millis(1)).await);
        assert!(!root.exists());
        assert!(template.exists());
    }

    #[tokio::test]
    async fn remove_already_gone_is_success() {
        let dir = TempDir::new().unwrap();
        let template = make_template(dir.path());
        let ws = BuildWorkspace::stage(&template).await.unwrap();
        std::fs::remove_dir_all(ws.root()).unwrap();

        assert!(ws.remove(3, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn remove_exhausts_retries_and_terminates() {
        let dir = TempDir::new().unwrap();
        // a regular file can never be removed as a directory, so every
        // attempt fails and the bounded retry loop must still terminate
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"").unwrap();

        let ws = BuildWorkspace {
            token: "test".to_string(),
            root: blocker.clone(),
        };

        let removed = ws.remove(3, Duration::from_millis(1)).await;
        assert!(!removed);
        assert!(blocker.exists());
    }
}
