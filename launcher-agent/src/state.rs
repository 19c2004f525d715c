//! Persisted installed-version state and agent directory layout.
//!
//! `version.json` is the sole source of truth for the currently installed
//! version. It is written once by the full-client install (with
//! `installDate`) and rewritten by every successful patch (with
//! `updateDate`).

use crate::utils::{Result, UpdateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of `version.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstalledState {
    pub version: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub install_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub update_date: Option<DateTime<Utc>>,
}

impl InstalledState {
    /// State written by a fresh full-client install.
    pub fn installed(version: &str) -> Self {
        InstalledState {
            version: version.to_string(),
            install_date: Some(Utc::now()),
            update_date: None,
        }
    }

    /// State written after a successful patch.
    pub fn updated(version: &str) -> Self {
        InstalledState {
            version: version.to_string(),
            install_date: None,
            update_date: Some(Utc::now()),
        }
    }

    /// Load the state file. `Ok(None)` when it does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let state = serde_json::from_str(&content)
            .map_err(|e| UpdateError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(state))
    }

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

/// Private state directory layout of the agent.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    state_dir: PathBuf,
}

impl AgentPaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        AgentPaths {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// `version.json` location.
    pub fn version_file(&self) -> PathBuf {
        self.state_dir.join("version.json")
    }

    /// `config.json` location.
    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }

    /// Scratch directory for in-flight downloads.
    pub fn downloads_dir(&self) -> PathBuf {
        self.state_dir.join("downloads")
    }

    /// Parent directory for backup snapshots.
    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }
}
