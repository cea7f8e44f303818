//! Configuration for modvault
//!
//! [`AppConfig`] is a plain value describing the managed roots. It is handed
//! to components explicitly; [`ConfigStore`] owns persistence and tells
//! dependents when the value changes.

pub mod paths;
mod store;

pub use paths::{detect_paths, DetectedPaths};
pub use store::{ConfigListener, ConfigStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::watch::RootPaths;

/// Directory name used under the platform config/data directories
pub const APP_DIR_NAME: &str = "modvault";

/// Steam app id of Space Marine 2
pub const DEFAULT_STEAM_APP_ID: &str = "2183900";

/// Store the game was installed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Steam,
    Epic,
    /// Not detected yet; launched through Steam
    #[default]
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steam => "steam",
            Self::Epic => "epic",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a platform name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "steam" => Some(Self::Steam),
            "epic" => Some(Self::Epic),
            "unknown" | "" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Configuration for modvault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Directory the game loads mods from
    pub active_mods_path: PathBuf,
    /// Library of inactive mods
    pub mods_vault_path: PathBuf,
    /// Snapshot store for save data
    pub mod_play_vault_path: PathBuf,
    /// The game's live save/config directory
    pub save_data_path: PathBuf,
    /// Where pre-reconcile backups of the active directory go
    pub backup_path: PathBuf,
    /// Process names that identify the running game
    pub game_process_names: Vec<String>,
    /// Install folder of the game, used for detection
    pub game_root: PathBuf,
    pub platform: Platform,
    /// Used for `steam://run/<id>`
    pub steam_app_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            active_mods_path: PathBuf::new(),
            mods_vault_path: data.join("mods_vault"),
            mod_play_vault_path: data.join("mod_play_vault"),
            save_data_path: PathBuf::new(),
            backup_path: data.join("backups"),
            game_process_names: Vec::new(),
            game_root: PathBuf::new(),
            platform: Platform::default(),
            steam_app_id: DEFAULT_STEAM_APP_ID.to_string(),
        }
    }
}

/// The configurable roots, used for validation messages and `config set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigRoot {
    ActiveMods,
    ModsVault,
    ModPlayVault,
    SaveData,
    Backup,
}

impl ConfigRoot {
    /// Returns all roots.
    pub fn all() -> &'static [ConfigRoot] {
        &[
            Self::ActiveMods,
            Self::ModsVault,
            Self::ModPlayVault,
            Self::SaveData,
            Self::Backup,
        ]
    }

    /// JSON key of this root
    pub fn key(&self) -> &'static str {
        match self {
            Self::ActiveMods => "activeModsPath",
            Self::ModsVault => "modsVaultPath",
            Self::ModPlayVault => "modPlayVaultPath",
            Self::SaveData => "saveDataPath",
            Self::Backup => "backupPath",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::ActiveMods => "Active mods directory",
            Self::ModsVault => "Mods vault",
            Self::ModPlayVault => "Mod-play vault",
            Self::SaveData => "Save data directory",
            Self::Backup => "Backup directory",
        }
    }

    /// Parse from a JSON key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::all().iter().copied().find(|r| r.key() == key)
    }
}

impl fmt::Display for ConfigRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl AppConfig {
    /// Load a config from a JSON string. Unknown keys are ignored.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Returns the configured path for a root (possibly empty).
    pub fn root(&self, root: ConfigRoot) -> &Path {
        match root {
            ConfigRoot::ActiveMods => &self.active_mods_path,
            ConfigRoot::ModsVault => &self.mods_vault_path,
            ConfigRoot::ModPlayVault => &self.mod_play_vault_path,
            ConfigRoot::SaveData => &self.save_data_path,
            ConfigRoot::Backup => &self.backup_path,
        }
    }

    fn root_mut(&mut self, root: ConfigRoot) -> &mut PathBuf {
        match root {
            ConfigRoot::ActiveMods => &mut self.active_mods_path,
            ConfigRoot::ModsVault => &mut self.mods_vault_path,
            ConfigRoot::ModPlayVault => &mut self.mod_play_vault_path,
            ConfigRoot::SaveData => &mut self.save_data_path,
            ConfigRoot::Backup => &mut self.backup_path,
        }
    }

    /// Returns the root if it is configured, or a configuration error.
    pub fn require_set(&self, root: ConfigRoot) -> Result<&Path> {
        let path = self.root(root);
        if is_unset(path) {
            return Err(Error::Config(format!("{} is not configured", root.label())));
        }
        Ok(path)
    }

    /// Returns the root if it is configured and exists on disk.
    pub fn require(&self, root: ConfigRoot) -> Result<&Path> {
        let path = self.require_set(root)?;
        if !path.is_dir() {
            return Err(Error::Config(format!(
                "{} does not exist: {}",
                root.label(),
                path.display()
            )));
        }
        Ok(path)
    }

    /// Sets a value by its JSON key. Used by the CLI.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "gameProcessNames" => {
                self.game_process_names = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                return Ok(());
            }
            "gameRoot" => {
                self.game_root = PathBuf::from(value.trim());
                return Ok(());
            }
            "platform" => {
                self.platform = Platform::parse(value).ok_or_else(|| {
                    Error::Config(format!("Unknown platform {:?}; use steam or epic", value))
                })?;
                return Ok(());
            }
            "steamAppId" => {
                let id = value.trim();
                if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::Config(format!("Invalid Steam app id: {:?}", value)));
                }
                self.steam_app_id = id.to_string();
                return Ok(());
            }
            _ => {}
        }
        let root = ConfigRoot::from_key(key)
            .ok_or_else(|| Error::Config(format!("Unknown configuration key: {}", key)))?;
        *self.root_mut(root) = PathBuf::from(value.trim());
        Ok(())
    }

    /// Watch roots derived from this config.
    ///
    /// mods = active mods directory, modPlay = mod-play vault,
    /// backup = backup directory. Every domain is set, so an unset root
    /// clears a previously watched one.
    pub fn watch_paths(&self) -> RootPaths {
        RootPaths {
            mods: Some(self.active_mods_path.clone()),
            mod_play: Some(self.mod_play_vault_path.clone()),
            backup: Some(self.backup_path.clone()),
        }
    }
}

/// True for an empty or whitespace-only path.
pub(crate) fn is_unset(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

/// Default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR_NAME).join("config.json"))
}

/// Default parent directory for the vaults
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
