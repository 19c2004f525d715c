//! Launcher configuration management.
//!
//! Loads configuration from a JSON file, merging loaded fields over
//! defaults: anything missing from the file falls back to its default
//! value, and unknown fields are ignored.

use crate::utils::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Path to the game client executable
    pub client_path: PathBuf,

    /// Installation directory the updater manages
    pub install_path: PathBuf,

    /// Cached installed version. The persisted version-state file is the
    /// source of truth; this field is reconciled from it on every check.
    pub current_version: String,

    /// Whether a full client installation has completed
    pub is_installed: bool,

    /// User-facing launcher settings
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub resolution: String,
    pub fullscreen: bool,
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            resolution: "1920x1080".to_string(),
            fullscreen: false,
            theme: "default".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_path: PathBuf::new(),
            install_path: PathBuf::new(),
            current_version: String::new(),
            is_installed: false,
            settings: Settings::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. A missing file yields the
    /// defaults; a present but unparseable file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| UpdateError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Persist the configuration back to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
