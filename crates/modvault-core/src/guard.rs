//! Path containment checks, directory creation and mod name validation.
//!
//! Every path the engine computes from a root and an entry name goes through
//! [`safe_join`] or [`assert_inside`] before it is touched.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Longest accepted mod name, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// Creates `path` and any missing parents.
///
/// Empty paths are accepted and ignored, so an unconfigured root can be passed
/// through without failing the caller.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
        return Ok(());
    }
    if path.is_dir() {
        return Ok(());
    }
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => {
            tracing::error!("ensure_dir failed for {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}

/// Returns true if `candidate` is `base` itself or lies below it.
///
/// Both paths are resolved against the current directory and normalised
/// lexically, so `base/a/../../etc` is correctly reported as outside.
pub fn is_inside(base: &Path, candidate: &Path) -> bool {
    let base = normalize(base);
    let candidate = normalize(candidate);

    let mut base_parts = base.components();
    let mut cand_parts = candidate.components();
    loop {
        match (base_parts.next(), cand_parts.next()) {
            (None, _) => return true,
            (Some(_), None) => return false,
            (Some(b), Some(c)) => {
                if !component_eq(b, c) {
                    return false;
                }
            }
        }
    }
}

/// Fails with [`Error::PathEscape`] unless `candidate` is inside `base`.
pub fn assert_inside(base: &Path, candidate: &Path) -> Result<()> {
    if is_inside(base, candidate) {
        Ok(())
    } else {
        Err(Error::PathEscape {
            base: base.to_path_buf(),
            candidate: candidate.to_path_buf(),
        })
    }
}

/// Joins `name` onto `base`, refusing results that escape `base`.
pub fn safe_join(base: &Path, name: &str) -> Result<PathBuf> {
    let joined = base.join(name);
    assert_inside(base, &joined)?;
    Ok(joined)
}

/// Returns true if `name` passes the mod name allowlist.
///
/// Accepted: 1 to [`MAX_NAME_LEN`] characters from `A-Z a-z 0-9 . _ -` and
/// space, excluding the special names `.` and `..`.
pub fn is_safe_name(name: &str) -> bool {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
}

/// Trims, validates and de-duplicates a list of names.
///
/// Invalid names are dropped rather than failing the batch. Order of first
/// occurrence is kept.
pub fn sanitize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in names {
        let name = raw.as_ref().trim();
        if !is_safe_name(name) {
            tracing::debug!("Dropping invalid mod name {:?}", raw.as_ref());
            continue;
        }
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}

/// Makes `path` absolute and resolves `.` and `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(any(windows, target_os = "macos"))]
fn component_eq(a: Component<'_>, b: Component<'_>) -> bool {
    a.as_os_str()
        .to_string_lossy()
        .eq_ignore_ascii_case(&b.as_os_str().to_string_lossy())
}

#[cfg(not(any(windows, target_os = "macos")))]
fn component_eq(a: Component<'_>, b: Component<'_>) -> bool {
    a == b
}
