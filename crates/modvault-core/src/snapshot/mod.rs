//! Save-data snapshots
//!
//! The snapshot store (the mod-play vault) holds one timestamped directory per
//! snapshot of the game's live save directory:
//!
//! ```text
//! mod_play_vault/
//!   .copy_log.jsonl
//!   20250101120000/
//!   20250101120000-1/
//! ```
//!
//! A snapshot is copied into a hidden `.<stamp>.partial` directory first and
//! renamed into place only once the copy finished, so an interrupted copy is
//! never mistaken for a snapshot. Only directories named like a stamp count.
//!
//! Restoring replaces the live directory's contents with the newest snapshot,
//! unless there is none or it is empty. Live saves are never wiped with
//! nothing to replace them.

pub mod copylog;

pub use copylog::{append_copy_event, read_copy_events, CopyEvent, CopyResult, COPY_LOG_FILE};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use walkdir::WalkDir;

use crate::config::{is_unset, AppConfig, ConfigRoot};
use crate::error::{Error, Result};
use crate::guard::{ensure_dir, is_inside, safe_join};
use crate::mover::{copy_tree, remove_entry, MirrorStats};
use crate::utils::{format_age, format_size};

/// chrono format of snapshot directory names
pub const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Suffix of the hidden directory a snapshot is copied into
pub const PARTIAL_SUFFIX: &str = ".partial";

const STAMP_LEN: usize = 14;

/// A snapshot directory in the store
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub stats: MirrorStats,
}

impl SnapshotInfo {
    pub fn size_display(&self) -> String {
        format_size(self.stats.bytes)
    }

    pub fn age_display(&self) -> String {
        format_age(self.modified)
    }
}

/// A snapshot that was just written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotCreated {
    pub path: PathBuf,
    pub stats: MirrorStats,
}

/// Result of [`SnapshotManager::restore_latest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RestoreOutcome {
    /// The live directory now mirrors `snapshot`
    Restored { snapshot: PathBuf, stats: MirrorStats },
    /// The store has no snapshot; live directory untouched
    NoSnapshot,
    /// The newest snapshot is empty; live directory untouched
    EmptySnapshot { snapshot: PathBuf },
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored { .. })
    }
}

/// Creates and restores snapshots under one store root.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    root: PathBuf,
}

impl SnapshotManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(config.require_set(ConfigRoot::ModPlayVault)?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies `live_dir` into a new timestamped snapshot.
    ///
    /// A copy-log line is appended whether the copy succeeds or not.
    pub fn snapshot_now(&self, live_dir: &Path) -> Result<SnapshotCreated> {
        if is_unset(&self.root) {
            return Err(Error::Config(format!(
                "{} is not configured",
                ConfigRoot::ModPlayVault.label()
            )));
        }
        if is_unset(live_dir) {
            return Err(Error::Config(format!(
                "{} is not configured",
                ConfigRoot::SaveData.label()
            )));
        }

        let started = Instant::now();
        let result = (|| -> Result<SnapshotCreated> {
            if !live_dir.is_dir() {
                return Err(Error::Config(format!(
                    "{} does not exist: {}",
                    ConfigRoot::SaveData.label(),
                    live_dir.display()
                )));
            }
            ensure_dir(&self.root)?;
            let path = create_stamped_dir(&self.root, None)?;
            let stats = publish_snapshot(&path, |staging| copy_tree(live_dir, staging))?;
            Ok(SnapshotCreated { path, stats })
        })();

        let event = match &result {
            Ok(created) => CopyEvent::ok(live_dir, &created.path, created.stats, started.elapsed()),
            Err(e) => CopyEvent::failed(live_dir, &self.root, e, started.elapsed()),
        };
        if let Err(e) = append_copy_event(&self.root, &event) {
            tracing::warn!("Could not write copy log in {}: {}", self.root.display(), e);
        }

        match &result {
            Ok(created) => tracing::info!(
                "Snapshot {} written ({} files, {})",
                created.path.display(),
                created.stats.files,
                format_size(created.stats.bytes)
            ),
            Err(e) => tracing::error!("Snapshot of {} failed: {}", live_dir.display(), e),
        }
        result
    }

    /// Mirrors the newest snapshot into `live_dir`.
    ///
    /// Skipped, with the live directory left exactly as it was, when the store
    /// is unset, missing, has no snapshot, or the newest one is empty.
    pub fn restore_latest(&self, live_dir: &Path) -> Result<RestoreOutcome> {
        if is_unset(live_dir) {
            return Err(Error::Config(format!(
                "{} is not configured",
                ConfigRoot::SaveData.label()
            )));
        }
        if is_unset(&self.root) {
            return Ok(RestoreOutcome::NoSnapshot);
        }

        let Some(snapshot) = pick_latest(&self.root) else {
            tracing::info!("No snapshot in {}, restore skipped", self.root.display());
            return Ok(RestoreOutcome::NoSnapshot);
        };

        if is_empty_dir(&snapshot) {
            tracing::warn!(
                "Newest snapshot {} is empty, restore skipped",
                snapshot.display()
            );
            return Ok(RestoreOutcome::EmptySnapshot { snapshot });
        }

        let stats = mirror_into(live_dir, &snapshot)?;
        tracing::info!(
            "Restored {} into {} ({} files)",
            snapshot.display(),
            live_dir.display(),
            stats.files
        );
        Ok(RestoreOutcome::Restored { snapshot, stats })
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots: Vec<SnapshotInfo> = snapshot_dirs(&self.root)?
            .into_iter()
            .map(|(path, modified)| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stats = tree_stats(&path);
                SnapshotInfo {
                    name,
                    path,
                    modified,
                    stats,
                }
            })
            .collect();

        snapshots.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(snapshots)
    }
}

/// Replaces the contents of `dst` with a copy of `src`.
///
/// Both directories are created if missing. Overlapping directories are
/// refused since clearing `dst` would destroy `src`.
pub fn mirror_into(dst: &Path, src: &Path) -> Result<MirrorStats> {
    if is_inside(dst, src) || is_inside(src, dst) {
        return Err(Error::Other(format!(
            "Refusing to mirror {} into overlapping directory {}",
            src.display(),
            dst.display()
        )));
    }

    ensure_dir(dst)?;
    ensure_dir(src)?;

    for entry in fs::read_dir(dst)? {
        remove_entry(&entry?.path())?;
    }

    copy_tree(src, dst)
}

/// Fills a staging directory next to `dest` with `fill`, then renames it over
/// the reserved (empty) `dest`.
///
/// On failure the staging directory and `dest` are both removed, leaving no
/// partial snapshot behind.
pub(crate) fn publish_snapshot<F>(dest: &Path, fill: F) -> Result<MirrorStats>
where
    F: FnOnce(&Path) -> Result<MirrorStats>,
{
    let staging = staging_path(dest)?;
    remove_entry(&staging)?;

    let result = fill(&staging).and_then(|stats| {
        fs::remove_dir(dest)?;
        fs::rename(&staging, dest)?;
        Ok(stats)
    });

    if result.is_err() {
        for leftover in [&staging, dest] {
            if let Err(e) = remove_entry(leftover) {
                tracing::warn!("Could not remove {}: {}", leftover.display(), e);
            }
        }
    }
    result
}

fn staging_path(dest: &Path) -> Result<PathBuf> {
    let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
        return Err(Error::Other(format!(
            "Snapshot path has no parent: {}",
            dest.display()
        )));
    };
    Ok(parent.join(format!(".{}{}", name.to_string_lossy(), PARTIAL_SUFFIX)))
}

/// True for `YYYYMMDDHHMMSS` optionally followed by `-N`.
pub fn is_snapshot_name(name: &str) -> bool {
    let (Some(stamp), Some(suffix)) = (name.get(..STAMP_LEN), name.get(STAMP_LEN..)) else {
        return false;
    };
    let stamp_ok = stamp.bytes().all(|b| b.is_ascii_digit())
        && NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_ok();
    let suffix_ok = suffix.is_empty()
        || suffix
            .strip_prefix('-')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    stamp_ok && suffix_ok
}

/// Newest snapshot directory of `root` by modification time.
pub fn pick_latest(root: &Path) -> Option<PathBuf> {
    let mut dirs = snapshot_dirs(root).ok()?;
    dirs.sort_by(|(a_path, a_time), (b_path, b_time)| {
        b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
    });
    dirs.into_iter().next().map(|(path, _)| path)
}

/// True if `path` has no entries. Missing or unreadable counts as empty.
pub fn is_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Creates a new directory under `root` named after the current local time,
/// optionally followed by `-label`. On collision `-1`, `-2`, ... is appended.
pub(crate) fn create_stamped_dir(root: &Path, label: Option<&str>) -> Result<PathBuf> {
    let stamp = Local::now().format(STAMP_FORMAT).to_string();
    let base = match label {
        Some(label) => format!("{}-{}", stamp, label),
        None => stamp,
    };

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}-{}", base, attempt)
        };
        let path = safe_join(root, &name)?;
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

fn snapshot_dirs(root: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let read_dir = match fs::read_dir(root) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if !is_snapshot_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_dir() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            dirs.push((entry.path(), modified));
        }
    }
    Ok(dirs)
}

fn tree_stats(path: &Path) -> MirrorStats {
    let mut stats = MirrorStats::default();
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            stats.files += 1;
            stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stamped_dir_collision_suffix() {
        let temp = TempDir::new().unwrap();
        let first = create_stamped_dir(temp.path(), None).unwrap();
        let second = create_stamped_dir(temp.path(), None).unwrap();
        let third = create_stamped_dir(temp.path(), Some("backup")).unwrap();

        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        let first_name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(first_name.len(), 14);
        assert!(first_name.chars().all(|c| c.is_ascii_digit()));
        assert!(third.to_string_lossy().contains("-backup"));

        // Force a collision on a fixed name
        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        fs::create_dir_all(temp.path().join("fixed").join(&stamp)).unwrap();
        let next = create_stamped_dir(&temp.path().join("fixed"), None).unwrap();
        let next_name = next.file_name().unwrap().to_string_lossy().into_owned();
        assert_ne!(next_name, stamp);
        assert!(next.is_dir());
    }

    #[test]
    fn test_mirror_into_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("profiles")).unwrap();
        fs::write(src.join("profiles").join("p1.sav"), "new").unwrap();
        fs::create_dir_all(dst.join("stale_dir")).unwrap();
        fs::write(dst.join("stale.sav"), "old").unwrap();

        let stats = mirror_into(&dst, &src).unwrap();
        assert_eq!(stats.files, 1);
        assert!(!dst.join("stale.sav").exists());
        assert!(!dst.join("stale_dir").exists());
        assert_eq!(
            fs::read_to_string(dst.join("profiles").join("p1.sav")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_mirror_into_refuses_overlap() {
        let temp = TempDir::new().unwrap();
        let outer = temp.path().join("outer");
        let inner = outer.join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("keep"), "x").unwrap();

        assert!(mirror_into(&outer, &inner).is_err());
        assert!(mirror_into(&inner, &outer).is_err());
        assert!(inner.join("keep").exists());
    }

    #[test]
    fn test_snapshot_names() {
        assert!(is_snapshot_name("20250101120000"));
        assert!(is_snapshot_name("20250101120000-3"));
        assert!(!is_snapshot_name("pre-reconcile"));
        assert!(!is_snapshot_name(".20250101120000.partial"));
        assert!(!is_snapshot_name("20250101120000-backup"));
        assert!(!is_snapshot_name("20251399120000"));
        assert!(!is_snapshot_name("2025"));
        assert!(!is_snapshot_name("20250101120000-"));
    }

    #[test]
    fn test_failed_copy_leaves_no_snapshot() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let live = temp.path().join("live");
        fs::create_dir_all(live.join("z_profile")).unwrap();
        fs::write(live.join("a_profile.sav"), "first").unwrap();
        fs::write(live.join("z_profile").join("p.sav"), "second").unwrap();

        let manager = SnapshotManager::new(&store);
        let good = manager.snapshot_now(&live).unwrap();

        // A copy that dies halfway through
        let reserved = create_stamped_dir(&store, None).unwrap();
        let result = publish_snapshot(&reserved, |staging| {
            fs::create_dir_all(staging).unwrap();
            fs::write(staging.join("a_profile.sav"), "first").unwrap();
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "z_profile",
            )))
        });
        assert!(result.is_err());
        assert!(!reserved.exists());
        assert!(!staging_path(&reserved).unwrap().exists());
        assert_eq!(pick_latest(&store), Some(good.path.clone()));

        let outcome = manager.restore_latest(&live).unwrap();
        assert_eq!(
            outcome,
            RestoreOutcome::Restored {
                snapshot: good.path,
                stats: MirrorStats { files: 2, bytes: 11 },
            }
        );
        assert_eq!(
            fs::read_to_string(live.join("z_profile").join("p.sav")).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_non_snapshot_dirs_are_never_restored() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let live = temp.path().join("live");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("profile.dat"), "precious").unwrap();

        // Leftover staging dir and a backup tree sharing the store
        for name in [".20990101000000.partial", "pre-reconcile"] {
            fs::create_dir_all(store.join(name)).unwrap();
            fs::write(store.join(name).join("half.dat"), "x").unwrap();
        }

        let manager = SnapshotManager::new(&store);
        assert_eq!(pick_latest(&store), None);
        assert!(manager.list().unwrap().is_empty());
        assert_eq!(
            manager.restore_latest(&live).unwrap(),
            RestoreOutcome::NoSnapshot
        );
        assert_eq!(fs::read_to_string(live.join("profile.dat")).unwrap(), "precious");
    }

    #[test]
    fn test_is_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert!(is_empty_dir(temp.path()));
        assert!(is_empty_dir(&temp.path().join("missing")));
        fs::write(temp.path().join("f"), "").unwrap();
        assert!(!is_empty_dir(temp.path()));
    }

    #[test]
    fn test_pick_latest_missing_root() {
        let temp = TempDir::new().unwrap();
        assert_eq!(pick_latest(&temp.path().join("nope")), None);
        assert_eq!(pick_latest(temp.path()), None);
    }

    #[test]
    fn test_restore_without_root_is_noop() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("live");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("save.dat"), "precious").unwrap();

        let manager = SnapshotManager::new("");
        assert_eq!(
            manager.restore_latest(&live).unwrap(),
            RestoreOutcome::NoSnapshot
        );
        assert_eq!(fs::read_to_string(live.join("save.dat")).unwrap(), "precious");
    }

    #[test]
    fn test_snapshot_requires_roots() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            SnapshotManager::new("").snapshot_now(temp.path()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SnapshotManager::new(temp.path()).snapshot_now(Path::new("")),
            Err(Error::Config(_))
        ));
    }
}
