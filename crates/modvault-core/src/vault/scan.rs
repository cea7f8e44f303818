//! Top-level listing of a mod root.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use super::is_tombstone;
use crate::error::Result;

/// File extensions that are never mods (compared case-insensitively)
pub const IGNORED_EXTENSIONS: &[&str] = &["txt"];

/// Lists the mod names directly inside `root`.
///
/// Directories always count. Files count unless their extension is ignored.
/// Symlinks, special files and entries being deleted are skipped. A missing
/// root lists as empty.
pub fn list_entries(root: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();

    let read_dir = match fs::read_dir(root) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };

    for entry in read_dir {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::debug!("Skipping non UTF-8 entry {:?}", raw);
                continue;
            }
        };
        if is_tombstone(&name) {
            continue;
        }

        if file_type.is_dir() {
            names.insert(name);
        } else if file_type.is_file() && !is_ignored_file(&name) {
            names.insert(name);
        }
    }

    Ok(names)
}

fn is_ignored_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            IGNORED_EXTENSIONS
                .iter()
                .any(|ignored| ext.eq_ignore_ascii_case(ignored))
        })
        .unwrap_or(false)
}
