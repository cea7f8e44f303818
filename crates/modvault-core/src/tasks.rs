//! Async wrappers for tokio hosts.
//!
//! The engine does plain blocking filesystem work. These helpers move it onto
//! tokio's blocking pool so an async caller never stalls its runtime.

use std::path::PathBuf;

use crate::error::Result;
use crate::snapshot::{RestoreOutcome, SnapshotCreated, SnapshotManager};
use crate::vault::{ModEntry, ModVault, ReconcileReport};

pub async fn scan(vault: ModVault) -> Result<Vec<ModEntry>> {
    tokio::task::spawn_blocking(move || vault.scan()).await?
}

pub async fn reconcile(vault: ModVault, desired: Vec<String>) -> Result<ReconcileReport> {
    tokio::task::spawn_blocking(move || vault.reconcile(desired)).await?
}

pub async fn delete_entry(vault: ModVault, name: String) -> Result<()> {
    tokio::task::spawn_blocking(move || vault.delete_entry(&name)).await?
}

pub async fn snapshot_now(manager: SnapshotManager, live_dir: PathBuf) -> Result<SnapshotCreated> {
    tokio::task::spawn_blocking(move || manager.snapshot_now(&live_dir)).await?
}

pub async fn restore_latest(
    manager: SnapshotManager,
    live_dir: PathBuf,
) -> Result<RestoreOutcome> {
    tokio::task::spawn_blocking(move || manager.restore_latest(&live_dir)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reconcile_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        let active = dir.path().join("active");
        let vault_root = dir.path().join("vault");
        fs::create_dir_all(active.join("A")).unwrap();
        fs::create_dir_all(vault_root.join("B")).unwrap();

        let vault = ModVault::new(&active, &vault_root);
        let report = reconcile(vault.clone(), vec!["B".to_string()]).await.unwrap();
        assert_eq!(report.moved_to_vault, vec!["A".to_string()]);
        assert_eq!(report.moved_to_active, vec!["B".to_string()]);

        let entries = scan(vault.clone()).await.unwrap();
        let enabled: Vec<_> = entries.iter().filter(|e| e.is_enabled()).collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "B");

        delete_entry(vault.clone(), "A".to_string()).await.unwrap();
        assert!(!vault_root.join("A").exists());
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("saves");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("profile.dat"), b"one").unwrap();

        let manager = SnapshotManager::new(dir.path().join("store"));
        let created = snapshot_now(manager.clone(), live.clone()).await.unwrap();
        assert_eq!(created.stats.files, 1);

        fs::write(live.join("profile.dat"), b"two").unwrap();
        let outcome = restore_latest(manager, live.clone()).await.unwrap();
        assert!(outcome.is_restored());
        assert_eq!(fs::read(live.join("profile.dat")).unwrap(), b"one");
    }
}
