//! Catalog loading from an extracted manifests tree
//!
//! Walks every file under the manifests root, parses the canonical-locale
//! root manifest of each package, and resolves duplicate identifiers to the
//! highest dotted version. Malformed or incomplete documents are skipped,
//! never fatal.

use crate::catalog::manifest::ManifestRecord;
use crate::catalog::version;
use crate::error::{ForgeError, ForgeResult};
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Load all package records under `manifests_dir`.
///
/// `batch_size` bounds how many manifest files are read and parsed
/// concurrently; catalogs in this domain hold tens of thousands of files
/// and unbounded concurrency exhausts file descriptors.
pub async fn load_catalog(
    manifests_dir: &Path,
    batch_size: usize,
) -> ForgeResult<Vec<ManifestRecord>> {
    if !manifests_dir.is_dir() {
        return Err(ForgeError::ManifestsDirMissing(manifests_dir.to_path_buf()));
    }

    let files = enumerate_root_manifests(manifests_dir).await?;
    info!("Found {} root manifest files", files.len());

    let mut latest: HashMap<String, ManifestRecord> = HashMap::new();
    let batch_size = batch_size.max(1);

    for batch in files.chunks(batch_size) {
        let parsed = join_all(batch.iter().map(|path| parse_manifest_file(path.clone()))).await;
        for record in parsed.into_iter().flatten() {
            merge_record(&mut latest, record);
        }
    }

    info!("Resolved {} packages", latest.len());
    Ok(latest.into_values().collect())
}

/// Keep the strictly-greater version per identifier; exact ties keep the
/// earliest-seen document.
fn merge_record(latest: &mut HashMap<String, ManifestRecord>, record: ManifestRecord) {
    match latest.get(&record.id) {
        Some(current) if version::compare(&record.version, &current.version) != Ordering::Greater => {
            // High-volume path: version skips are not worth a log line each
            debug!(
                "Skipping {} v{} (already have v{})",
                record.id, record.version, current.version
            );
        }
        _ => {
            latest.insert(record.id.clone(), record);
        }
    }
}

/// Enumerate candidate files in a stable order.
///
/// A candidate ends in a manifest extension and follows the canonical
/// locale-qualified root naming; sibling per-locale and per-installer
/// documents describe the same logical package and are skipped. Sorting
/// makes tie resolution independent of filesystem enumeration order.
async fn enumerate_root_manifests(manifests_dir: &Path) -> ForgeResult<Vec<PathBuf>> {
    let root = manifests_dir.to_path_buf();
    let mut files = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!("Skipping unreadable path during manifest walk: {err}");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(is_root_manifest_name)
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| ForgeError::Internal(format!("manifest walk task failed: {e}")))?;

    files.sort();
    Ok(files)
}

/// Whether a file name is a canonical-locale root manifest
fn is_root_manifest_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".locale.en-us.yaml") || lower.ends_with(".locale.en-us.yml")
}

/// Read and resolve one manifest file. Any failure skips the file.
async fn parse_manifest_file(path: PathBuf) -> Option<ManifestRecord> {
    let raw = match fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Skipping {}: read failed: {}", path.display(), e);
            return None;
        }
    };

    let doc: serde_yaml::Value = match serde_yaml::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Skipping {}: YAML parse failed: {}", path.display(), e);
            return None;
        }
    };

    match ManifestRecord::from_yaml(&doc) {
        Some(record) => Some(record),
        None => {
            warn!("Skipping {}: missing required fields", path.display());
            None
        }
    }
}
