//! On-disk layout of a Document directory: `0001.svg`, `0002.svg`, …
//!
//! Units are written atomically (temp file + rename) so an interrupted run
//! never leaves a truncated unit for the assembler to choke on.

use crate::error::VecbookError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension of a normalized page unit.
pub const UNIT_EXTENSION: &str = "svg";

/// File name of unit `index` (1-indexed).
pub fn unit_file_name(index: usize) -> String {
    format!("{index:04}.{UNIT_EXTENSION}")
}

/// Unit number encoded in a file name, if it is a unit file.
pub fn unit_index(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_suffix(&format!(".{UNIT_EXTENSION}"))?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Create the Document directory if needed.
pub async fn ensure_dir(dir: &Path) -> Result<(), VecbookError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| VecbookError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}

/// Write unit `index` into `dir`, replacing any earlier version.
pub async fn write_unit(dir: &Path, index: usize, markup: &str) -> Result<PathBuf, std::io::Error> {
    let path = dir.join(unit_file_name(index));
    let tmp = dir.join(format!(".{}.tmp", unit_file_name(index)));
    tokio::fs::write(&tmp, markup.as_bytes()).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    debug!("Wrote {} ({} bytes)", path.display(), markup.len());
    Ok(path)
}

/// Remove unit files numbered above `count`, left over from a longer earlier run.
///
/// A run that produced no units keeps whatever an earlier run left.
/// Returns how many were removed.
pub async fn prune_units_after(dir: &Path, count: usize) -> Result<usize, VecbookError> {
    if count == 0 {
        debug!("Nothing captured; keeping existing units in {}", dir.display());
        return Ok(0);
    }
    let io_err = |e: std::io::Error| VecbookError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(unit_index) else {
            continue;
        };
        if index > count {
            tokio::fs::remove_file(entry.path()).await.map_err(io_err)?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {} stale units from {}", removed, dir.display());
    }
    Ok(removed)
}
