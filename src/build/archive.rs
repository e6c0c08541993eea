//! Streaming zip archiving of build output
//!
//! Larger output trees are streamed file-by-file into the archive rather
//! than buffered whole in memory.

use crate::error::{ForgeError, ForgeResult};
use std::io::Write;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Archive `src_dir` into the zip file at `dest_zip`
pub async fn archive_directory(src_dir: &Path, dest_zip: &Path) -> ForgeResult<()> {
    let src = src_dir.to_path_buf();
    let dest = dest_zip.to_path_buf();
    tokio::task::spawn_blocking(move || archive_blocking(&src, &dest))
        .await
        .map_err(|e| ForgeError::Internal(format!("archive task failed: {e}")))?
}

fn archive_blocking(src_dir: &Path, dest_zip: &Path) -> ForgeResult<()> {
    let file = std::fs::File::create(dest_zip)
        .map_err(|e| ForgeError::io(format!("creating archive {}", dest_zip.display()), e))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default();

    for entry in WalkDir::new(src_dir) {
        let entry = entry.map_err(|e| {
            ForgeError::Internal(format!("walking output dir {}: {e}", src_dir.display()))
        })?;
        let path = entry.path();
        if path == src_dir {
            continue;
        }

        let rel = path
            .strip_prefix(src_dir)
            .map_err(|e| ForgeError::Internal(format!("relativizing output path: {e}")))?
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(rel, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(rel, options)?;
            let mut reader = std::fs::File::open(path)
                .map_err(|e| ForgeError::io(format!("opening {}", path.display()), e))?;
            std::io::copy(&mut reader, &mut writer)
                .map_err(|e| ForgeError::io(format!("archiving {}", path.display()), e))?;
        }
    }

    writer.flush().map_err(|e| {
        ForgeError::io(format!("flushing archive {}", dest_zip.display()), e)
    })?;
    writer.finish()?;
    debug!("Archived {} into {}", src_dir.display(), dest_zip.display());
    Ok(())
}
