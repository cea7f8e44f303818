//! Single owner of the persisted configuration.

use std::fs;
use std::path::{Path, PathBuf};

use super::{default_config_path, AppConfig};
use crate::error::{Error, Result};

/// Callback invoked after the configuration changed and was saved.
pub type ConfigListener = Box<dyn Fn(&AppConfig) + Send + Sync>;

/// Owns an [`AppConfig`], its file on disk, and the listeners that depend on it.
pub struct ConfigStore {
    path: PathBuf,
    config: AppConfig,
    listeners: Vec<ConfigListener>,
}

impl ConfigStore {
    /// Loads the config from `path`.
    ///
    /// A missing file yields the defaults, which are written out immediately so
    /// the user has a file to edit. A malformed file is an error; it is never
    /// silently overwritten.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = match fs::read_to_string(&path) {
            Ok(content) => AppConfig::from_json(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, writing defaults", path.display());
                let config = AppConfig::default();
                write_config(&path, &config)?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            config,
            listeners: Vec::new(),
        })
    }

    /// Loads from the platform default location.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path()
            .ok_or_else(|| Error::Config("No configuration directory on this platform".into()))?;
        Self::load(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Writes the current config to disk.
    pub fn save(&self) -> Result<()> {
        write_config(&self.path, &self.config)
    }

    /// Registers a listener for configuration changes.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(&AppConfig) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Applies `edit`, then persists and notifies listeners if anything changed.
    ///
    /// Returns whether the config changed. On a failed save the in-memory
    /// value is rolled back and listeners are not called.
    pub fn update<F>(&mut self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut AppConfig) -> Result<()>,
    {
        let mut next = self.config.clone();
        edit(&mut next)?;
        if next == self.config {
            return Ok(false);
        }

        write_config(&self.path, &next)?;
        self.config = next;

        for listener in &self.listeners {
            listener(&self.config);
        }
        Ok(true)
    }
}

fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        crate::guard::ensure_dir(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
