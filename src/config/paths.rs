//! Path management for server-manager
//!
//! ## Path Resolution Order
//!
//! 1. `SERVER_MANAGER_HOME` environment variable (if set)
//! 2. `/opt/server-manager`
//!
//! The settings file can additionally be pointed elsewhere with
//! `SERVER_MANAGER_CONFIG` or the `--config` flag.

use std::path::PathBuf;

use crate::error::ManagerError;

/// Default installation root of the management application
pub const DEFAULT_HOME: &str = "/opt/server-manager";

/// Manages all local paths used by server-manager
#[derive(Debug, Clone)]
pub struct ManagerPaths {
    /// Base directory for all server-manager files
    base_dir: PathBuf,
    /// Explicit settings file location, if overridden
    settings_override: Option<PathBuf>,
}

impl ManagerPaths {
    /// Create a new ManagerPaths instance from the environment
    pub fn new() -> Self {
        let base_dir = std::env::var("SERVER_MANAGER_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_HOME));
        let settings_override = std::env::var("SERVER_MANAGER_CONFIG").ok().map(PathBuf::from);

        Self {
            base_dir,
            settings_override,
        }
    }

    /// Create ManagerPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            settings_override: None,
        }
    }

    /// Point the settings file somewhere else
    pub fn with_settings_file(mut self, path: PathBuf) -> Self {
        self.settings_override = Some(path);
        self
    }

    /// Get the base directory (/opt/server-manager or override)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config directory (<base>/config)
    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    /// Get the logs directory (<base>/logs)
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.settings_override
            .clone()
            .unwrap_or_else(|| self.config_dir().join("settings.yaml"))
    }

    /// Get the path to the run history journal
    pub fn history_file(&self) -> PathBuf {
        self.logs_dir().join("history.jsonl")
    }

    /// Ensure the config and logs directories exist
    pub fn ensure_directories(&self) -> Result<(), ManagerError> {
        std::fs::create_dir_all(self.config_dir())
            .map_err(|e| ManagerError::Io(format!("Failed to create config directory: {}", e)))?;

        std::fs::create_dir_all(self.logs_dir())
            .map_err(|e| ManagerError::Io(format!("Failed to create logs directory: {}", e)))?;

        Ok(())
    }
}

impl Default for ManagerPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = ManagerPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(
            paths.settings_file(),
            temp_dir.path().join("config").join("settings.yaml")
        );
        assert_eq!(
            paths.history_file(),
            temp_dir.path().join("logs").join("history.jsonl")
        );
    }

    #[test]
    fn test_settings_override() {
        let temp_dir = TempDir::new().unwrap();
        let custom = temp_dir.path().join("elsewhere.yaml");
        let paths =
            ManagerPaths::with_base_dir(temp_dir.path().to_path_buf()).with_settings_file(custom.clone());
        assert_eq!(paths.settings_file(), custom);
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = ManagerPaths::with_base_dir(temp_dir.path().to_path_buf());

        paths.ensure_directories().unwrap();

        assert!(paths.config_dir().exists());
        assert!(paths.logs_dir().exists());
    }
}
