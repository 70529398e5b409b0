//! Per-project configuration
//!
//! Stored as TOML at `.gud/config.toml`. A fresh project gets defaults
//! derived from its directory name and the current user.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_SERVER_DOMAIN: &str = "localhost";
const DEFAULT_CHECKPOINTS: u32 = 3;

/// Project configuration stored at `.gud/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Author name recorded in saved versions.
    pub name: String,
    pub project_name: String,
    /// Host the project is pushed to and pulled from.
    #[serde(default = "default_server_domain")]
    pub server_domain: String,
    /// Number of checkpoints kept by collaborators that create them.
    #[serde(default = "default_checkpoints")]
    pub checkpoints: u32,
    #[serde(default)]
    pub auto_push: bool,
}

fn default_server_domain() -> String {
    DEFAULT_SERVER_DOMAIN.to_string()
}

fn default_checkpoints() -> u32 {
    DEFAULT_CHECKPOINTS
}

/// Login name of the current user, or `anonymous`
pub fn default_author() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

impl Config {
    /// Defaults for a project rooted at `root`
    pub fn for_project(root: &Path) -> Self {
        let project_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name: default_author(),
            project_name,
            server_domain: default_server_domain(),
            checkpoints: DEFAULT_CHECKPOINTS,
            auto_push: true,
        }
    }

    /// Load config from a metadata directory.
    pub fn load(gud_dir: &Path) -> Result<Self> {
        let config_path = gud_dir.join(CONFIG_FILE);
        let data = fs::read_to_string(&config_path)?;
        toml::from_str(&data)
            .map_err(|e| Error::Config(format!("failed to parse {:?}: {}", config_path, e)))
    }

    /// Save config to a metadata directory.
    pub fn save(&self, gud_dir: &Path) -> Result<()> {
        let config_path = gud_dir.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }
}
