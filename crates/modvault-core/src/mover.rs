//! Moving and copying single filesystem entries between roots.
//!
//! A move first tries an atomic `rename`. When that fails (typically because
//! source and destination live on different volumes) the entry is copied and
//! the source removed afterwards. A failed fallback leaves the copy in place;
//! callers must treat a failed move as "state unknown" and rescan.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::guard::ensure_dir;

/// Counters for a recursive copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStats {
    /// Regular files copied
    pub files: u64,
    /// Bytes copied
    pub bytes: u64,
}

/// Moves a file or directory from `src` to `dst`.
pub fn move_entry(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }

    match fs::rename(src, dst) {
        Ok(()) => {
            tracing::debug!("Renamed {} -> {}", src.display(), dst.display());
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(
                "Atomic rename {} -> {} failed ({}), falling back to copy+delete",
                src.display(),
                dst.display(),
                e
            );
        }
    }

    if meta.is_dir() {
        copy_tree(src, dst)?;
    } else {
        fs::copy(src, dst)?;
    }

    remove_entry(src).map_err(|e| {
        tracing::error!(
            "Copied {} to {} but could not remove the source: {}",
            src.display(),
            dst.display(),
            e
        );
        e
    })
}

/// Recursively copies the contents of `src` into `dst`.
///
/// `dst` is created if needed. Existing files are overwritten. Symlinks and
/// special files are skipped. A plain file as `src` is copied to `dst`.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<MirrorStats> {
    let mut stats = MirrorStats::default();

    if src.is_file() {
        if let Some(parent) = dst.parent() {
            ensure_dir(parent)?;
        }
        stats.bytes += fs::copy(src, dst)?;
        stats.files += 1;
        return Ok(stats);
    }

    ensure_dir(dst)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;

        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            stats.bytes += fs::copy(entry.path(), &target)?;
            stats.files += 1;
        } else {
            tracing::debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }

    Ok(stats)
}

/// Removes a file or a whole directory tree. A missing path is not an error.
pub fn remove_entry(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Returns true if something (file, directory or link) exists at `path`.
pub(crate) fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
