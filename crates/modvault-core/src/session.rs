//! Mod-play sessions
//!
//! A session keeps the game's saves for modded play separate from vanilla
//! saves: before launch the newest snapshot is restored into the live save
//! directory, and after the game exits the live directory is snapshotted
//! back into the mod-play vault. Vanilla sessions only launch the game.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::config::paths::{epic_launch_uri, epic_manifest_path, GAME_DIR_NAME};
use crate::config::{is_unset, AppConfig, ConfigRoot, Platform, DEFAULT_STEAM_APP_ID};
use crate::error::{Error, Result};
use crate::monitor::{wait_for_session_with_stop, MonitorSettings, ProcessProbe, SessionWait};
use crate::snapshot::{RestoreOutcome, SnapshotCreated, SnapshotManager};

/// Starts the game.
pub trait Launcher {
    fn launch(&mut self) -> Result<()>;
}

/// Opens a launcher URI (e.g. `steam://run/<id>`) with the desktop's handler.
///
/// Fire and forget: returns once the opener has been spawned.
#[derive(Debug, Clone)]
pub struct UriLauncher {
    uri: String,
}

impl UriLauncher {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    pub fn steam(app_id: &str) -> Self {
        let app_id = match app_id.trim() {
            "" => DEFAULT_STEAM_APP_ID,
            id => id,
        };
        Self::new(format!("steam://run/{}", app_id))
    }

    /// Picks the launch URI for the configured platform. Anything but Epic
    /// goes through Steam.
    pub fn for_config(config: &AppConfig) -> Result<Self> {
        Self::for_platform(config.platform, &config.steam_app_id, &epic_manifest_path())
    }

    fn for_platform(platform: Platform, steam_app_id: &str, epic_manifest: &Path) -> Result<Self> {
        match platform {
            Platform::Epic => epic_launch_uri(epic_manifest, GAME_DIR_NAME)?
                .map(Self::new)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Could not find the Epic install of {} in {}",
                        GAME_DIR_NAME,
                        epic_manifest.display()
                    ))
                }),
            Platform::Steam | Platform::Unknown => Ok(Self::steam(steam_app_id)),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Default for UriLauncher {
    fn default() -> Self {
        Self::steam(DEFAULT_STEAM_APP_ID)
    }
}

impl Launcher for UriLauncher {
    fn launch(&mut self) -> Result<()> {
        use std::process::Command;

        tracing::info!("Launching game via {}", self.uri);

        #[cfg(windows)]
        let mut command = {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", "", &self.uri]);
            c
        };
        #[cfg(target_os = "macos")]
        let mut command = {
            let mut c = Command::new("open");
            c.arg(&self.uri);
            c
        };
        #[cfg(not(any(windows, target_os = "macos")))]
        let mut command = {
            let mut c = Command::new("xdg-open");
            c.arg(&self.uri);
            c
        };

        command
            .spawn()
            .map(|_| ())
            .map_err(|e| Error::Other(format!("Failed to open {}: {}", self.uri, e)))
    }
}

/// Whether saves are swapped around the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchMode {
    Mod,
    Vanilla,
}

impl LaunchMode {
    /// Mod play whenever the active mods directory has anything in it.
    pub fn detect(active_root: &Path) -> Self {
        let has_mods = !is_unset(active_root)
            && fs::read_dir(active_root)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
        if has_mods {
            Self::Mod
        } else {
            Self::Vanilla
        }
    }
}

/// What a session did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub mode: LaunchMode,
    pub restore: Option<RestoreOutcome>,
    pub wait: Option<SessionWait>,
    pub snapshot: Option<SnapshotCreated>,
    pub duration_secs: u64,
}

/// Restore, launch, wait, snapshot
pub struct ModPlaySession {
    snapshots: SnapshotManager,
    save_dir: PathBuf,
    active_root: PathBuf,
    settings: MonitorSettings,
    stop: Arc<AtomicBool>,
}

impl ModPlaySession {
    pub fn new(
        snapshots: SnapshotManager,
        save_dir: impl Into<PathBuf>,
        active_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            snapshots,
            save_dir: save_dir.into(),
            active_root: active_root.into(),
            settings: MonitorSettings::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let snapshots = SnapshotManager::from_config(config)?;
        let save_dir = config.require_set(ConfigRoot::SaveData)?;
        Ok(Self::new(snapshots, save_dir, config.root(ConfigRoot::ActiveMods)))
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Flag that ends the wait early. A stopped session takes no snapshot.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Runs one session. `force` overrides mode detection.
    pub fn run(
        &self,
        force: Option<LaunchMode>,
        launcher: &mut dyn Launcher,
        probe: &mut dyn ProcessProbe,
    ) -> Result<SessionReport> {
        let started = Instant::now();
        let mode = force.unwrap_or_else(|| LaunchMode::detect(&self.active_root));
        tracing::info!("Starting {:?} session", mode);

        let mut report = SessionReport {
            mode,
            restore: None,
            wait: None,
            snapshot: None,
            duration_secs: 0,
        };

        if mode == LaunchMode::Mod {
            let restore = self.snapshots.restore_latest(&self.save_dir).map_err(|e| {
                tracing::error!("Failed to prepare save files: {}", e);
                e
            })?;
            report.restore = Some(restore);
        }

        launcher.launch()?;

        if mode == LaunchMode::Vanilla {
            tracing::info!("Vanilla session, nothing to monitor");
            return Ok(report);
        }

        let wait = wait_for_session_with_stop(probe, &self.settings, &self.stop);
        report.wait = Some(wait);

        if wait != SessionWait::Stopped {
            tracing::info!("Saving mod-play saves back to the vault");
            report.snapshot = Some(self.snapshots.snapshot_now(&self.save_dir)?);
        }

        report.duration_secs = started.elapsed().as_secs();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::tests::{fast_settings, ScriptedProbe};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeLauncher {
        launches: u32,
        fail: bool,
    }

    impl Launcher for FakeLauncher {
        fn launch(&mut self) -> Result<()> {
            self.launches += 1;
            if self.fail {
                Err(Error::Other("launcher missing".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: PathBuf,
        saves: PathBuf,
        active: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("mod_play_vault");
        let saves = dir.path().join("saves");
        let active = dir.path().join("mods");
        fs::create_dir_all(&saves).unwrap();
        fs::create_dir_all(&active).unwrap();
        Fixture {
            store,
            saves,
            active,
            _dir: dir,
        }
    }

    fn session(f: &Fixture) -> ModPlaySession {
        ModPlaySession::new(SnapshotManager::new(&f.store), &f.saves, &f.active)
            .with_settings(fast_settings())
    }

    #[test]
    fn test_mode_detection() {
        let f = fixture();
        assert_eq!(LaunchMode::detect(&f.active), LaunchMode::Vanilla);
        assert_eq!(LaunchMode::detect(Path::new("")), LaunchMode::Vanilla);
        fs::create_dir(f.active.join("ReduxHUD")).unwrap();
        assert_eq!(LaunchMode::detect(&f.active), LaunchMode::Mod);
    }

    #[test]
    fn test_mod_session_round_trip() {
        let f = fixture();
        fs::create_dir(f.active.join("ReduxHUD")).unwrap();

        // A previous mod-play snapshot and vanilla saves in the live dir
        let manager = SnapshotManager::new(&f.store);
        fs::write(f.saves.join("profile.dat"), b"modded").unwrap();
        manager.snapshot_now(&f.saves).unwrap();
        fs::write(f.saves.join("profile.dat"), b"vanilla").unwrap();

        let mut launcher = FakeLauncher::default();
        let mut probe = ScriptedProbe::new(&[true, true, false, false]);
        let report = session(&f).run(None, &mut launcher, &mut probe).unwrap();

        assert_eq!(report.mode, LaunchMode::Mod);
        assert!(report.restore.as_ref().unwrap().is_restored());
        assert_eq!(report.wait, Some(SessionWait::Exited { checks: 2 }));
        assert_eq!(launcher.launches, 1);
        assert_eq!(fs::read(f.saves.join("profile.dat")).unwrap(), b"modded");

        let created = report.snapshot.unwrap();
        assert_eq!(fs::read(created.path.join("profile.dat")).unwrap(), b"modded");
        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[test]
    fn test_vanilla_session_only_launches() {
        let f = fixture();
        fs::write(f.saves.join("profile.dat"), b"vanilla").unwrap();

        let mut launcher = FakeLauncher::default();
        let mut probe = ScriptedProbe::new(&[]);
        let report = session(&f).run(None, &mut launcher, &mut probe).unwrap();

        assert_eq!(report.mode, LaunchMode::Vanilla);
        assert!(report.restore.is_none());
        assert!(report.wait.is_none());
        assert!(report.snapshot.is_none());
        assert_eq!(probe.calls, 0);
        assert!(!f.store.exists());
    }

    #[test]
    fn test_launch_failure_skips_snapshot() {
        let f = fixture();
        let mut launcher = FakeLauncher {
            fail: true,
            ..Default::default()
        };
        let mut probe = ScriptedProbe::new(&[]);
        let result = session(&f).run(Some(LaunchMode::Mod), &mut launcher, &mut probe);

        assert!(result.is_err());
        assert_eq!(probe.calls, 0);
        assert!(SnapshotManager::new(&f.store).list().unwrap().is_empty());
    }

    #[test]
    fn test_first_session_without_snapshot() {
        let f = fixture();
        fs::write(f.saves.join("profile.dat"), b"vanilla").unwrap();

        let mut launcher = FakeLauncher::default();
        let mut probe = ScriptedProbe::new(&[false]);
        let report = session(&f)
            .run(Some(LaunchMode::Mod), &mut launcher, &mut probe)
            .unwrap();

        assert_eq!(report.restore, Some(RestoreOutcome::NoSnapshot));
        assert_eq!(report.wait, Some(SessionWait::NeverAppeared));
        // Live saves untouched, and still snapshotted afterwards
        assert_eq!(fs::read(f.saves.join("profile.dat")).unwrap(), b"vanilla");
        assert!(report.snapshot.is_some());
    }

    #[test]
    fn test_stopped_session_takes_no_snapshot() {
        let f = fixture();
        let s = session(&f);
        s.stop_flag().store(true, Ordering::SeqCst);

        let mut launcher = FakeLauncher::default();
        let mut probe = ScriptedProbe::new(&[true]);
        let report = s.run(Some(LaunchMode::Mod), &mut launcher, &mut probe).unwrap();

        assert_eq!(report.wait, Some(SessionWait::Stopped));
        assert!(report.snapshot.is_none());
    }

    #[test]
    fn test_steam_uri() {
        assert_eq!(UriLauncher::default().uri(), "steam://run/2183900");
        assert_eq!(UriLauncher::steam(" ").uri(), "steam://run/2183900");

        let config = AppConfig {
            steam_app_id: "553850".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(UriLauncher::for_config(&config).unwrap().uri(), "steam://run/553850");
    }

    #[test]
    fn test_epic_uri_from_manifest() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("LauncherInstalled.dat");

        assert!(matches!(
            UriLauncher::for_platform(Platform::Epic, "2183900", &manifest),
            Err(Error::Config(_))
        ));

        fs::write(
            &manifest,
            r#"{"InstallationList": [{"InstallLocation": "D:\Epic Games\Warhammer40000SpaceMarine2", "NamespaceId": "ns1"}]}"#,
        )
        .unwrap();
        let launcher = UriLauncher::for_platform(Platform::Epic, "2183900", &manifest).unwrap();
        assert_eq!(
            launcher.uri(),
            "com.epicgames.launcher://apps/ns1?action=launch&silent=true"
        );
    }
}
