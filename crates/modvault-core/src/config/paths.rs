//! Platform-specific detection of the game install and its save directory

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{is_unset, AppConfig, Platform};
use crate::error::Result;

/// Install folder name used by Steam
pub const GAME_DIR_NAME: &str = "Space Marine 2";

/// Install folder name used by the Epic launcher
pub const EPIC_DIR_NAME: &str = "Warhammer40000SpaceMarine2";

/// Game executable inside the install folder
pub const GAME_EXE_NAME: &str = "Warhammer 40000 Space Marine 2.exe";

/// Where the game loads mods from, relative to the install folder
const MODS_SUBDIR: [&str; 3] = ["client_pc", "root", "mods"];

/// Save storage below the local app data directory
const SAVE_STORAGE_SUBDIR: [&str; 4] = ["Saber", "Space Marine 2", "storage", "steam"];

/// What [`detect_paths`] found. `None` means nothing usable was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedPaths {
    pub game_root: Option<PathBuf>,
    pub game_exe: Option<PathBuf>,
    pub active_mods_path: Option<PathBuf>,
    pub save_data_path: Option<PathBuf>,
    pub platform: Platform,
}

impl DetectedPaths {
    /// Fills the unset values of `config` with what was detected.
    ///
    /// Configured values are never overwritten.
    pub fn apply_to(&self, config: &mut AppConfig) {
        fill(&mut config.game_root, self.game_root.as_deref());
        fill(&mut config.active_mods_path, self.active_mods_path.as_deref());
        fill(&mut config.save_data_path, self.save_data_path.as_deref());
        if config.platform == Platform::Unknown && self.platform != Platform::Unknown {
            config.platform = self.platform;
        }
    }
}

fn fill(slot: &mut PathBuf, found: Option<&Path>) {
    if let Some(found) = found {
        if is_unset(slot) {
            *slot = found.to_path_buf();
        }
    }
}

/// Detects the game install, its mods folder and the save directory.
///
/// Configured values that exist on disk win over detected ones.
pub fn detect_paths(config: &AppConfig) -> DetectedPaths {
    detect_with(
        config,
        &candidate_game_roots(),
        &save_storage_roots(&config.steam_app_id),
    )
}

fn detect_with(
    config: &AppConfig,
    candidate_roots: &[PathBuf],
    storage_roots: &[PathBuf],
) -> DetectedPaths {
    let existing = |path: &Path| (!is_unset(path) && path.exists()).then(|| path.to_path_buf());

    let game_root = existing(&config.game_root).or_else(|| {
        candidate_roots
            .iter()
            .find(|root| root.is_dir())
            .cloned()
    });

    let game_exe = game_root
        .as_ref()
        .map(|root| root.join(GAME_EXE_NAME))
        .filter(|exe| exe.is_file());

    let active_mods_path = existing(&config.active_mods_path).or_else(|| {
        game_root
            .as_ref()
            .map(|root| MODS_SUBDIR.iter().fold(root.clone(), |p, part| p.join(part)))
            .filter(|mods| mods.is_dir())
    });

    let save_data_path = existing(&config.save_data_path)
        .or_else(|| storage_roots.iter().find_map(|root| find_save_data_dir(root)));

    let platform = game_root
        .as_deref()
        .or(active_mods_path.as_deref())
        .map(infer_platform)
        .unwrap_or_default();

    tracing::debug!(
        "Detected game root {:?}, mods {:?}, saves {:?}, platform {}",
        game_root,
        active_mods_path,
        save_data_path,
        platform
    );

    DetectedPaths {
        game_root,
        game_exe,
        active_mods_path,
        save_data_path,
        platform,
    }
}

/// Finds `<entry>/Main/config` or `<entry>/<id>/Main/config` below the save
/// storage root.
pub fn find_save_data_dir(storage_root: &Path) -> Option<PathBuf> {
    for first in subdirs(storage_root) {
        let direct = first.join("Main").join("config");
        if direct.is_dir() {
            return Some(direct);
        }
        for second in subdirs(&first) {
            let nested = second.join("Main").join("config");
            if nested.is_dir() {
                return Some(nested);
            }
        }
    }
    None
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs
}

/// Lowercase letters and digits only, so "Space Marine 2" and
/// "Warhammer40000SpaceMarine2" compare equal on the interesting part.
fn squish(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Guesses the store from an install path.
pub fn infer_platform(path: &Path) -> Platform {
    let normalized = path.to_string_lossy().replace('\\', "/").to_lowercase();
    if !squish(&normalized).contains("spacemarine2") {
        return Platform::Unknown;
    }

    let in_epic = normalized.contains("epiclibrary") || normalized.contains("/epic games/");
    let in_steam = normalized.contains("steamapps") || normalized.contains("/steam/");

    if in_epic {
        Platform::Epic
    } else if in_steam {
        Platform::Steam
    } else {
        Platform::Unknown
    }
}

/// Get all available drive letters on Windows
#[cfg(target_os = "windows")]
fn get_available_drives() -> Vec<PathBuf> {
    (b'A'..=b'Z')
        .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
        .filter(|path| path.exists())
        .collect()
}

/// Common install locations, most likely first
fn candidate_game_roots() -> Vec<PathBuf> {
    #[allow(unused_mut)]
    let mut roots = Vec::new();

    #[cfg(target_os = "windows")]
    {
        let steam_common = |base: PathBuf| base.join("steamapps").join("common").join(GAME_DIR_NAME);
        for drive in get_available_drives() {
            roots.push(steam_common(drive.join("Program Files (x86)").join("Steam")));
            roots.push(steam_common(drive.join("Steam")));
            roots.push(steam_common(drive.join("SteamLibrary")));
            roots.push(drive.join("Program Files").join("Epic Games").join(EPIC_DIR_NAME));
            roots.push(drive.join("EpicLibrary").join(EPIC_DIR_NAME));
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".steam/steam/steamapps/common").join(GAME_DIR_NAME));
            roots.push(home.join(".local/share/Steam/steamapps/common").join(GAME_DIR_NAME));
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(data) = dirs::data_dir() {
            roots.push(data.join("Steam/steamapps/common").join(GAME_DIR_NAME));
        }
    }

    roots
}

/// Directories holding one folder per Steam account with saves below
fn save_storage_roots(steam_app_id: &str) -> Vec<PathBuf> {
    let under = |base: PathBuf| SAVE_STORAGE_SUBDIR.iter().fold(base, |p, part| p.join(part));
    let mut roots = Vec::new();

    if let Some(local) = dirs::data_local_dir() {
        roots.push(under(local));
    }

    // Proton keeps a Windows user profile per app
    #[cfg(target_os = "linux")]
    {
        if let Some(home) = dirs::home_dir() {
            let app_id = if steam_app_id.trim().is_empty() {
                super::DEFAULT_STEAM_APP_ID
            } else {
                steam_app_id.trim()
            };
            for steam in [".steam/steam", ".local/share/Steam"] {
                let profile = home
                    .join(steam)
                    .join("steamapps/compatdata")
                    .join(app_id)
                    .join("pfx/drive_c/users/steamuser/AppData/Local");
                roots.push(under(profile));
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = steam_app_id;

    roots
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EpicInstall {
    #[serde(default)]
    install_location: String,
    namespace_id: Option<String>,
    app_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EpicManifest {
    #[serde(default)]
    installation_list: Vec<EpicInstall>,
}

/// Default location of the Epic launcher's install list
pub fn epic_manifest_path() -> PathBuf {
    let program_data = std::env::var_os("PROGRAMDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("C:\\ProgramData"));
    program_data
        .join("Epic")
        .join("EpicGamesLauncher")
        .join("Data")
        .join("LauncherInstalled.dat")
}

/// Builds the Epic launch URI for the install whose location contains
/// `fragment`.
///
/// A missing manifest or no matching install is `Ok(None)`; a malformed
/// manifest is an error.
pub fn epic_launch_uri(manifest: &Path, fragment: &str) -> Result<Option<String>> {
    let content = match fs::read_to_string(manifest) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Epic install list not found at {}", manifest.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let parsed: EpicManifest = serde_json::from_str(&content)?;

    let needle = squish(fragment);
    let Some(install) = parsed
        .installation_list
        .iter()
        .find(|i| squish(&i.install_location).contains(&needle))
    else {
        tracing::warn!("No Epic install matches {:?}", fragment);
        return Ok(None);
    };

    let id = install
        .namespace_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or(install.app_name.as_deref().filter(|id| !id.is_empty()));
    Ok(id.map(|id| format!("com.epicgames.launcher://apps/{}?action=launch&silent=true", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkdirs(path: &Path) -> PathBuf {
        fs::create_dir_all(path).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn test_detects_install_layout() {
        let temp = TempDir::new().unwrap();
        let root = mkdirs(&temp.path().join("steamapps/common/Space Marine 2"));
        let mods = mkdirs(&root.join("client_pc/root/mods"));
        fs::write(root.join(GAME_EXE_NAME), "").unwrap();
        let storage = temp.path().join("storage");
        let saves = mkdirs(&storage.join("user").join("76561198000000000/Main/config"));

        let detected = detect_with(
            &AppConfig::default(),
            &[temp.path().join("nowhere"), root.clone()],
            &[storage],
        );

        assert_eq!(detected.game_root, Some(root.clone()));
        assert_eq!(detected.game_exe, Some(root.join(GAME_EXE_NAME)));
        assert_eq!(detected.active_mods_path, Some(mods));
        assert_eq!(detected.save_data_path, Some(saves));
        assert_eq!(detected.platform, Platform::Steam);
    }

    #[test]
    fn test_existing_config_wins() {
        let temp = TempDir::new().unwrap();
        let configured = mkdirs(&temp.path().join("my_mods"));
        let candidate = mkdirs(&temp.path().join("Space Marine 2"));
        mkdirs(&candidate.join("client_pc/root/mods"));

        let config = AppConfig {
            active_mods_path: configured.clone(),
            ..AppConfig::default()
        };
        let detected = detect_with(&config, &[candidate], &[]);
        assert_eq!(detected.active_mods_path, Some(configured));
        assert_eq!(detected.save_data_path, None);
    }

    #[test]
    fn test_nothing_found() {
        let temp = TempDir::new().unwrap();
        let detected = detect_with(&AppConfig::default(), &[temp.path().join("no")], &[]);
        assert_eq!(detected, DetectedPaths::default());
    }

    #[test]
    fn test_save_dir_directly_below_storage() {
        let temp = TempDir::new().unwrap();
        let saves = mkdirs(&temp.path().join("12345/Main/config"));
        assert_eq!(find_save_data_dir(temp.path()), Some(saves));
        assert_eq!(find_save_data_dir(&temp.path().join("missing")), None);
    }

    #[test]
    fn test_apply_fills_only_unset() {
        let detected = DetectedPaths {
            game_root: Some(PathBuf::from("/games/Space Marine 2")),
            active_mods_path: Some(PathBuf::from("/games/Space Marine 2/client_pc/root/mods")),
            save_data_path: Some(PathBuf::from("/saves/found")),
            platform: Platform::Epic,
            ..Default::default()
        };
        let mut config = AppConfig {
            save_data_path: PathBuf::from("/saves/mine"),
            ..AppConfig::default()
        };

        detected.apply_to(&mut config);
        assert_eq!(config.game_root, PathBuf::from("/games/Space Marine 2"));
        assert_eq!(config.save_data_path, PathBuf::from("/saves/mine"));
        assert_eq!(config.platform, Platform::Epic);

        // An explicit platform is kept
        config.platform = Platform::Steam;
        detected.apply_to(&mut config);
        assert_eq!(config.platform, Platform::Steam);
    }

    #[test]
    fn test_infer_platform() {
        assert_eq!(
            infer_platform(Path::new("E:\\Steam\\steamapps\\common\\Space Marine 2")),
            Platform::Steam
        );
        assert_eq!(
            infer_platform(Path::new("D:/EpicLibrary/Warhammer40000SpaceMarine2")),
            Platform::Epic
        );
        assert_eq!(
            infer_platform(Path::new("/home/me/.local/share/Steam/steamapps/common/Space Marine 2")),
            Platform::Steam
        );
        assert_eq!(infer_platform(Path::new("/games/Space Marine 2")), Platform::Unknown);
        assert_eq!(infer_platform(Path::new("/steamapps/common/Other")), Platform::Unknown);
    }

    #[test]
    fn test_epic_launch_uri() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("LauncherInstalled.dat");

        assert_eq!(epic_launch_uri(&manifest, GAME_DIR_NAME).unwrap(), None);

        fs::write(
            &manifest,
            r#"{"InstallationList": [
                {"InstallLocation": "E:\\EpicLibrary\\Satisfactory", "NamespaceId": "crab"},
                {"InstallLocation": "E:\\EpicLibrary\\Warhammer40000SpaceMarine2", "NamespaceId": "", "AppName": "sm2app"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            epic_launch_uri(&manifest, GAME_DIR_NAME).unwrap().as_deref(),
            Some("com.epicgames.launcher://apps/sm2app?action=launch&silent=true")
        );
        assert_eq!(epic_launch_uri(&manifest, "Hades").unwrap(), None);

        fs::write(&manifest, "not json").unwrap();
        assert!(epic_launch_uri(&manifest, GAME_DIR_NAME).is_err());
    }
}
