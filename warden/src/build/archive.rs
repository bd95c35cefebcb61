//! Tar build contexts

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::WardenError;

/// Directories never shipped to the image build
const EXCLUDED_DIRS: &[&str] = &[".git"];

/// Package `src` into an uncompressed tar at `dest`, paths relative to `src`.
/// Returns the number of entries written.
pub async fn tar_build_context(src: &Path, dest: &Path) -> Result<usize, WardenError> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || write_tar(&src, &dest))
        .await
        .map_err(|e| WardenError::BuildError(format!("tar task failed: {}", e)))?
}

fn write_tar(src: &Path, dest: &Path) -> Result<usize, WardenError> {
    let file = std::fs::File::create(dest)?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && EXCLUDED_DIRS
                    .iter()
                    .any(|excluded| entry.file_name() == *excluded))
        });

    let mut entries = 0;
    for entry in walker {
        let entry = entry.map_err(|e| {
            WardenError::BuildError(format!("walking {}: {}", src.display(), e))
        })?;
        let relative: PathBuf = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| WardenError::Internal(e.to_string()))?
            .to_path_buf();
        if entry.file_type().is_dir() {
            builder.append_dir(&relative, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &relative)?;
        }
        entries += 1;
    }

    builder.into_inner()?.sync_all()?;
    debug!("Wrote {} entries from {} to {}", entries, src.display(), dest.display());
    Ok(entries)
}
