//! # Configuration Module
//!
//! Data directory resolution and the small runtime configuration file.
//!
//! ## Data Storage
//!
//! Encore keeps everything in the platform-standard data directory:
//! - Linux: `~/.local/share/encore/`
//! - macOS: `~/Library/Application Support/encore/`
//! - Windows: `%APPDATA%\encore\`
//!
//! The directory holds `encore.db` (library tables plus snapshot state) and,
//! optionally, `config.json` with [`RuntimeConfig`] overrides.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::DEFAULT_MAX_AGE_DAYS;
use crate::snapshot::DEFAULT_RETENTION_DAYS;

const APP_DIR: &str = "encore";
const DB_FILE: &str = "encore.db";
const CONFIG_FILE: &str = "config.json";

/// Returns the platform-appropriate database file path.
///
/// Creates the `encore` data directory if it doesn't exist yet.
///
/// # Platform Behavior
///
/// - **Linux**: `~/.local/share/encore/encore.db`
/// - **macOS**: `~/Library/Application Support/encore/encore.db`
/// - **Windows**: `%APPDATA%\encore\encore.db`
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The encore subdirectory cannot be created due to permissions
///
/// # Examples
///
/// ```no_run
/// use encore::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Returns the encore data directory, creating it if needed.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create Encore data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Location of `config.json` in the data directory.
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Database holding the library tables and snapshot state
    pub db_path: PathBuf,
    /// Day-snapshots kept in the rolling history
    pub retention_days: usize,
    /// A snapshot older than this many calendar days is stale
    pub max_age_days: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from(DB_FILE)),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration with explicit database path
    #[must_use]
    pub fn with_db_path(db_path: PathBuf) -> Self {
        Self {
            db_path,
            ..Self::default()
        }
    }

    /// Read `config.json` from the data directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config.normalized())
    }

    /// Write `config.json` to the data directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("Failed to encode config")?;
        fs::write(path, raw).with_context(|| format!("Failed to write config {}", path.display()))
    }

    fn normalized(mut self) -> Self {
        self.retention_days = self.retention_days.max(1);
        self.max_age_days = self.max_age_days.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_db_path_returns_valid_path() {
        let path = get_db_path().expect("Should get valid path");
        assert_eq!(path.file_name().unwrap(), "encore.db");

        let parent = path.parent().expect("Database path should have parent");
        assert_eq!(parent.file_name().unwrap(), "encore");
        assert!(parent.is_dir(), "data directory should be created");
    }

    #[test]
    fn test_get_db_path_consistent_results() {
        let path1 = get_db_path().expect("First call should succeed");
        let path2 = get_db_path().expect("Second call should succeed");
        assert_eq!(path1, path2);
        assert!(path1.is_absolute(), "Database path should be absolute");
    }

    #[test]
    fn test_missing_config_uses_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = RuntimeConfig::load_from(&temp_dir.path().join("config.json"))?;
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.max_age_days, 1);
        Ok(())
    }

    #[test]
    fn test_config_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("config.json");

        let config = RuntimeConfig {
            retention_days: 30,
            ..RuntimeConfig::with_db_path(temp_dir.path().join("x.db"))
        };
        config.save_to(&path)?;

        assert_eq!(RuntimeConfig::load_from(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_partial_config_fills_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"retention_days": 0}"#)?;

        let config = RuntimeConfig::load_from(&path)?;
        assert_eq!(config.retention_days, 1, "retention is at least one day");
        assert_eq!(config.max_age_days, 1);
        Ok(())
    }
}
