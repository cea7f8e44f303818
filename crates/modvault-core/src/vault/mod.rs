//! Mod vault reconciliation
//!
//! A mod is a top-level entry (directory or loose file) named by its file
//! name. It lives in the active directory when enabled and in the vault when
//! disabled. [`ModVault::reconcile`] moves entries between the two roots until
//! the active directory holds exactly the desired set.

mod scan;

pub use scan::{list_entries, IGNORED_EXTENSIONS};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{is_unset, AppConfig, ConfigRoot};
use crate::error::{EntryFailure, Error, Result};
use crate::guard::{assert_inside, ensure_dir, is_safe_name, safe_join, sanitize_names};
use crate::mover::{copy_tree, entry_exists, move_entry, remove_entry, MirrorStats};
use crate::snapshot::create_stamped_dir;

/// Sub-directory of the backup root that receives pre-reconcile copies
pub const PRE_RECONCILE_DIR: &str = "pre-reconcile";

/// A mod as seen across both roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModEntry {
    pub name: String,
    pub present_in_active: bool,
    pub present_in_vault: bool,
}

impl ModEntry {
    /// An entry in the active directory is what the game loads.
    pub fn is_enabled(&self) -> bool {
        self.present_in_active
    }

    /// Present in both roots; the next reconcile removes one copy.
    pub fn is_duplicate(&self) -> bool {
        self.present_in_active && self.present_in_vault
    }
}

/// Where the pre-reconcile backup went
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub stats: MirrorStats,
}

/// What a successful reconcile did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub moved_to_vault: Vec<String>,
    pub moved_to_active: Vec<String>,
    pub duplicates_removed: Vec<String>,
    /// `None` when no backup root is configured or the backup failed
    pub backup: Option<BackupRecord>,
}

impl ReconcileReport {
    /// True if the call changed nothing on disk besides the backup.
    pub fn is_noop(&self) -> bool {
        self.moved_to_vault.is_empty()
            && self.moved_to_active.is_empty()
            && self.duplicates_removed.is_empty()
    }
}

/// The active directory and the vault it is reconciled against.
#[derive(Debug, Clone)]
pub struct ModVault {
    active_root: PathBuf,
    vault_root: PathBuf,
    backup_root: Option<PathBuf>,
}

impl ModVault {
    pub fn new(active_root: impl Into<PathBuf>, vault_root: impl Into<PathBuf>) -> Self {
        Self {
            active_root: active_root.into(),
            vault_root: vault_root.into(),
            backup_root: None,
        }
    }

    /// Enables the pre-reconcile backup into `<root>/pre-reconcile/`.
    pub fn with_backup_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.backup_root = (!is_unset(&root)).then_some(root);
        self
    }

    /// Builds a vault from configuration.
    ///
    /// The active directory must exist and the vault must be configured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let active = config.require(ConfigRoot::ActiveMods)?;
        let vault = config.require_set(ConfigRoot::ModsVault)?;
        Ok(Self::new(active, vault).with_backup_root(&config.backup_path))
    }

    pub fn active_root(&self) -> &Path {
        &self.active_root
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    pub fn backup_root(&self) -> Option<&Path> {
        self.backup_root.as_deref()
    }

    /// Lists every mod in either root, sorted by name.
    pub fn scan(&self) -> Result<Vec<ModEntry>> {
        let active = list_entries(&self.active_root)?;
        let vault = list_entries(&self.vault_root)?;

        let entries = active
            .union(&vault)
            .map(|name| ModEntry {
                name: name.clone(),
                present_in_active: active.contains(name),
                present_in_vault: vault.contains(name),
            })
            .collect();
        Ok(entries)
    }

    /// Names of the mods currently in the active directory.
    pub fn enabled_names(&self) -> Result<Vec<String>> {
        Ok(list_entries(&self.active_root)?.into_iter().collect())
    }

    /// Moves entries so the active directory contains exactly `desired`.
    ///
    /// Invalid names in `desired` are dropped. Names found in neither root are
    /// ignored. Per-entry failures do not stop the batch; they are returned
    /// together as [`Error::Reconcile`] after every other entry was handled.
    /// A path escaping its root aborts immediately.
    pub fn reconcile<I, S>(&self, desired: I) -> Result<ReconcileReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.validate_roots()?;
        let want: HashSet<String> = sanitize_names(desired).into_iter().collect();
        ensure_dir(&self.vault_root)?;

        tracing::info!(
            "Reconciling {} desired mods ({} -> {})",
            want.len(),
            self.vault_root.display(),
            self.active_root.display()
        );

        let mut report = ReconcileReport {
            backup: self.backup_active(),
            ..Default::default()
        };
        let mut failures = Vec::new();

        let present_active = list_entries(&self.active_root)?;
        let present_vault = list_entries(&self.vault_root)?;

        // Not wanted: active -> vault. A copy already in the vault is left for
        // duplicate resolution.
        for name in &present_active {
            if want.contains(name) || present_vault.contains(name) {
                continue;
            }
            let (active_path, vault_path) = self.entry_paths(name)?;
            match move_if_still_needed(&active_path, &vault_path) {
                Ok(true) => {
                    tracing::debug!("Disabled {}", name);
                    report.moved_to_vault.push(name.clone());
                }
                Ok(false) => {}
                Err(e) => failures.push(EntryFailure::new(name, "move to vault", e)),
            }
        }

        // Wanted: vault -> active
        let mut wanted: Vec<&String> = want.iter().collect();
        wanted.sort();
        for name in wanted {
            let (active_path, vault_path) = self.entry_paths(name)?;
            match move_if_still_needed(&vault_path, &active_path) {
                Ok(true) => {
                    tracing::debug!("Enabled {}", name);
                    report.moved_to_active.push(name.clone());
                }
                Ok(false) => {}
                Err(e) => failures.push(EntryFailure::new(name, "move to active", e)),
            }
        }

        // Duplicates: keep the copy that matches the desired state
        let union: BTreeSet<&String> = present_active
            .iter()
            .chain(present_vault.iter())
            .chain(want.iter())
            .collect();
        for name in union {
            let (active_path, vault_path) = self.entry_paths(name)?;
            if !(entry_exists(&active_path) && entry_exists(&vault_path)) {
                continue;
            }
            let (stale, action) = if want.contains(name) {
                (&vault_path, "remove vault duplicate")
            } else {
                (&active_path, "remove active duplicate")
            };
            match remove_entry(stale) {
                Ok(()) => {
                    tracing::debug!("Removed duplicate {}", stale.display());
                    report.duplicates_removed.push(name.clone());
                }
                Err(e) => failures.push(EntryFailure::new(name, action, e)),
            }
        }

        if !failures.is_empty() {
            tracing::warn!("Reconcile finished with {} failed entries", failures.len());
            return Err(Error::Reconcile { failures });
        }

        tracing::info!(
            "Reconcile done: {} disabled, {} enabled, {} duplicates removed",
            report.moved_to_vault.len(),
            report.moved_to_active.len(),
            report.duplicates_removed.len()
        );
        Ok(report)
    }

    /// Permanently removes a mod from both roots.
    ///
    /// No backup is made. Each copy is first renamed aside, so a copy that is
    /// locked (typically by the running game) fails before anything was
    /// removed and both copies stay whole. The error then names the entry.
    pub fn delete_entry(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if !is_safe_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        let (active_path, vault_path) = self.entry_paths(name)?;
        let busy = |source: std::io::Error| Error::EntryBusy {
            name: name.to_string(),
            source,
        };

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        for path in [active_path, vault_path] {
            match stage_for_delete(&path) {
                Ok(Some(tombstone)) => staged.push((path, tombstone)),
                Ok(None) => {}
                Err(source) => {
                    unstage(&staged);
                    return Err(busy(source));
                }
            }
        }

        for (i, (_, tombstone)) in staged.iter().enumerate() {
            if let Err(source) = delete_strict(tombstone) {
                unstage(&staged[i..]);
                return Err(busy(source));
            }
        }

        tracing::info!("Deleted mod {}", name);
        Ok(())
    }

    fn validate_roots(&self) -> Result<()> {
        if is_unset(&self.active_root) {
            return Err(Error::Config(format!(
                "{} is not configured",
                ConfigRoot::ActiveMods.label()
            )));
        }
        if is_unset(&self.vault_root) {
            return Err(Error::Config(format!(
                "{} is not configured",
                ConfigRoot::ModsVault.label()
            )));
        }
        if !self.active_root.is_dir() {
            return Err(Error::Config(format!(
                "{} does not exist: {}",
                ConfigRoot::ActiveMods.label(),
                self.active_root.display()
            )));
        }
        Ok(())
    }

    fn entry_paths(&self, name: &str) -> Result<(PathBuf, PathBuf)> {
        let active = safe_join(&self.active_root, name)?;
        let vault = safe_join(&self.vault_root, name)?;
        Ok((active, vault))
    }

    /// Copies the active directory into a fresh stamped backup directory.
    /// Failures are logged and otherwise ignored.
    fn backup_active(&self) -> Option<BackupRecord> {
        let root = self.backup_root.as_ref()?.join(PRE_RECONCILE_DIR);

        let result = (|| -> Result<BackupRecord> {
            ensure_dir(&root)?;
            let dest = create_stamped_dir(&root, Some("backup"))?;
            assert_inside(&root, &dest)?;
            let stats = copy_tree(&self.active_root, &dest)?;
            Ok(BackupRecord { path: dest, stats })
        })();

        match result {
            Ok(record) => {
                tracing::info!(
                    "Backed up {} files ({} bytes) to {}",
                    record.stats.files,
                    record.stats.bytes,
                    record.path.display()
                );
                Some(record)
            }
            Err(e) => {
                tracing::warn!("Pre-reconcile backup failed, continuing: {}", e);
                None
            }
        }
    }
}

/// Moves `src` to `dst` unless `src` vanished or `dst` appeared since the
/// roots were listed. Returns whether a move happened.
fn move_if_still_needed(src: &Path, dst: &Path) -> Result<bool> {
    if !entry_exists(src) {
        tracing::debug!("{} is gone, skipping", src.display());
        return Ok(false);
    }
    if entry_exists(dst) {
        tracing::debug!("{} already exists, skipping", dst.display());
        return Ok(false);
    }
    move_entry(src, dst)?;
    Ok(true)
}

/// Suffix of an entry renamed aside for deletion
pub const TOMBSTONE_SUFFIX: &str = ".deleting";

/// True for names produced by [`ModVault::delete_entry`] while it works.
pub(crate) fn is_tombstone(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TOMBSTONE_SUFFIX)
}

/// Renames `path` to a hidden sibling so it can be removed in one go.
///
/// Returns `None` when there is nothing to delete. Fails without touching
/// anything if part of the tree cannot be removed.
fn stage_for_delete(path: &Path) -> std::io::Result<Option<PathBuf>> {
    if !entry_exists(path) {
        return Ok(None);
    }
    if let Some(locked) = find_unremovable(path) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("{} is read-only", locked.display()),
        ));
    }

    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cannot delete {}", path.display()),
        ));
    };
    let base = format!(".{}", name.to_string_lossy());
    let mut attempt = 0u32;
    let tombstone = loop {
        let candidate = if attempt == 0 {
            parent.join(format!("{}{}", base, TOMBSTONE_SUFFIX))
        } else {
            parent.join(format!("{}-{}{}", base, attempt, TOMBSTONE_SUFFIX))
        };
        if !entry_exists(&candidate) {
            break candidate;
        }
        attempt += 1;
    };

    fs::rename(path, &tombstone)?;
    tracing::debug!("Staged {} for deletion", path.display());
    Ok(Some(tombstone))
}

/// First entry under `path` whose permissions would stop a recursive remove.
fn find_unremovable(path: &Path) -> Option<PathBuf> {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|entry| {
            entry.metadata().is_ok_and(|meta| {
                meta.permissions().readonly() && (meta.is_dir() || cfg!(windows))
            })
        })
        .map(|entry| entry.into_path())
}

/// Puts staged entries back under their original names.
fn unstage(staged: &[(PathBuf, PathBuf)]) {
    for (original, tombstone) in staged {
        if let Err(e) = fs::rename(tombstone, original) {
            tracing::error!(
                "Could not restore {} from {}: {}",
                original.display(),
                tombstone.display(),
                e
            );
        }
    }
}

/// Removes a file or directory without retrying or forcing permissions.
fn delete_strict(path: &Path) -> std::io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        vault: ModVault,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let active = temp.path().join("active");
        let vault = temp.path().join("vault");
        fs::create_dir_all(&active).unwrap();
        fs::create_dir_all(&vault).unwrap();
        let vault = ModVault::new(active, vault).with_backup_root(temp.path().join("backups"));
        Fixture { _temp: temp, vault }
    }

    fn add_mod(root: &Path, name: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("mod.pak"), name).unwrap();
    }

    #[test]
    fn test_scan_merges_roots() {
        let f = fixture();
        add_mod(f.vault.active_root(), "Alpha");
        add_mod(f.vault.vault_root(), "Beta");
        add_mod(f.vault.active_root(), "Both");
        add_mod(f.vault.vault_root(), "Both");
        fs::write(f.vault.active_root().join("readme.txt"), "notes").unwrap();
        fs::write(f.vault.active_root().join("loose.pak"), "x").unwrap();

        let entries = f.vault.scan().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Both", "loose.pak"]);
        assert!(entries[0].is_enabled());
        assert!(!entries[1].is_enabled());
        assert!(entries[2].is_duplicate());
    }

    #[test]
    fn test_reconcile_moves_both_ways() {
        let f = fixture();
        add_mod(f.vault.active_root(), "Old");
        add_mod(f.vault.vault_root(), "New");

        let report = f.vault.reconcile(["New"]).unwrap();
        assert_eq!(report.moved_to_vault, vec!["Old"]);
        assert_eq!(report.moved_to_active, vec!["New"]);
        assert!(f.vault.active_root().join("New").is_dir());
        assert!(f.vault.vault_root().join("Old").is_dir());
        assert!(!f.vault.vault_root().join("New").exists());
    }

    #[test]
    fn test_reconcile_backs_up_active() {
        let f = fixture();
        add_mod(f.vault.active_root(), "Keep");

        let report = f.vault.reconcile(["Keep"]).unwrap();
        let backup = report.backup.as_ref().unwrap();
        assert!(backup.path.starts_with(f.vault.backup_root().unwrap().join(PRE_RECONCILE_DIR)));
        assert!(backup.path.join("Keep").join("mod.pak").is_file());
        assert_eq!(backup.stats.files, 1);
        assert!(report.is_noop());
    }

    #[test]
    fn test_reconcile_requires_active_dir() {
        let temp = TempDir::new().unwrap();
        let vault = ModVault::new(temp.path().join("missing"), temp.path().join("vault"));
        assert!(matches!(vault.reconcile(["A"]), Err(Error::Config(_))));
        // Nothing was created before the check
        assert!(!temp.path().join("vault").exists());

        let unset = ModVault::new("", temp.path().join("vault"));
        assert!(matches!(unset.reconcile(["A"]), Err(Error::Config(_))));
    }

    #[test]
    fn test_reconcile_drops_invalid_names() {
        let f = fixture();
        add_mod(f.vault.vault_root(), "Good");

        let report = f.vault.reconcile(["Good", "../../etc", "a/b"]).unwrap();
        assert_eq!(report.moved_to_active, vec!["Good"]);
    }

    #[test]
    fn test_delete_entry_removes_everywhere() {
        let f = fixture();
        add_mod(f.vault.active_root(), "Gone");
        add_mod(f.vault.vault_root(), "Gone");
        fs::write(f.vault.vault_root().join("single.pak"), "x").unwrap();

        f.vault.delete_entry("Gone").unwrap();
        f.vault.delete_entry("single.pak").unwrap();
        // Unknown names are fine
        f.vault.delete_entry("Never").unwrap();

        assert!(f.vault.scan().unwrap().is_empty());
    }

    #[test]
    fn test_move_rechecks_both_sides() {
        let f = fixture();
        let active = f.vault.active_root().to_path_buf();
        let vault = f.vault.vault_root().to_path_buf();

        // Removed by the user after the listing
        assert!(!move_if_still_needed(&active.join("Vanished"), &vault.join("Vanished")).unwrap());

        // A vault copy appeared after the listing: neither side is touched
        add_mod(&active, "Racy");
        fs::create_dir_all(vault.join("Racy")).unwrap();
        fs::write(vault.join("Racy").join("other.pak"), "other").unwrap();
        assert!(!move_if_still_needed(&active.join("Racy"), &vault.join("Racy")).unwrap());
        assert!(active.join("Racy").join("mod.pak").is_file());
        assert!(!vault.join("Racy").join("mod.pak").exists());

        add_mod(&active, "Plain");
        assert!(move_if_still_needed(&active.join("Plain"), &vault.join("Plain")).unwrap());
        assert!(vault.join("Plain").join("mod.pak").is_file());
    }

    #[test]
    fn test_tombstones_are_not_mods() {
        let f = fixture();
        add_mod(f.vault.active_root(), "Real");
        add_mod(f.vault.active_root(), ".Real.deleting");
        assert!(is_tombstone(".Real.deleting"));
        assert!(!is_tombstone("Real.deleting"));

        let names: Vec<_> = f.vault.scan().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Real"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_locked_delete_keeps_both_copies_whole() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let active_copy = f.vault.active_root().join("Foo");
        let vault_copy = f.vault.vault_root().join("Foo");
        add_mod(f.vault.active_root(), "Foo");
        fs::create_dir_all(vault_copy.join("a_free")).unwrap();
        fs::write(vault_copy.join("a_top.pak"), "top").unwrap();
        fs::write(vault_copy.join("a_free").join("x.pak"), "x").unwrap();
        let locked = vault_copy.join("z_locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("held.pak"), "held").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let result = f.vault.delete_entry("Foo");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(Error::EntryBusy { ref name, .. }) if name == "Foo"));
        assert!(active_copy.join("mod.pak").is_file());
        assert!(vault_copy.join("a_top.pak").is_file());
        assert!(vault_copy.join("a_free").join("x.pak").is_file());
        assert!(locked.join("held.pak").is_file());
        assert_eq!(
            f.vault.scan().unwrap(),
            vec![ModEntry {
                name: "Foo".to_string(),
                present_in_active: true,
                present_in_vault: true,
            }]
        );

        // Unlocked, it goes away completely
        f.vault.delete_entry("Foo").unwrap();
        assert!(f.vault.scan().unwrap().is_empty());
        assert_eq!(fs::read_dir(f.vault.vault_root()).unwrap().count(), 0);
    }

    #[test]
    fn test_delete_entry_rejects_bad_names() {
        let f = fixture();
        assert!(matches!(f.vault.delete_entry(".."), Err(Error::InvalidName(_))));
        assert!(matches!(f.vault.delete_entry("a/b"), Err(Error::InvalidName(_))));
        assert!(matches!(f.vault.delete_entry(""), Err(Error::InvalidName(_))));
    }
}
