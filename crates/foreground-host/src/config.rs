// Host configuration
// Stored as JSON at ~/.config/foreground-host/config.json unless a path is given.

use anyhow::{Context, Result};
use foreground::LauncherConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Effective configuration for the host driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    #[serde(flatten)]
    pub launcher: LauncherConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            launcher: LauncherConfig::default(),
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "foreground", "foreground-host")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Get the default config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load config from a specific path; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<HostConfig> {
    if path.exists() {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    } else {
        Ok(HostConfig::default())
    }
}

/// Save config to a specific path
pub fn save_config_to(config: &HostConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Load from `explicit` if given, else from the default location
pub fn load_config(explicit: Option<&Path>) -> Result<HostConfig> {
    match explicit {
        Some(path) => load_config_from(path),
        None => load_config_from(&config_path()?),
    }
}
