//! Settings file model for server-manager
//!
//! Mirrors the YAML settings file section by section. Every section has
//! defaults, so a partial (or missing) file still yields a usable setup.
//! Per-service fields are optional here and merged with the defaults of
//! the service they belong to when the file is resolved into a
//! [`ManagerConfig`](super::resolved::ManagerConfig).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, ManagerResult};
use crate::models::RetentionPolicy;

/// Connection to the remote backup host
///
/// `host` is handed to ssh as is, so it may be an alias from the ssh client
/// configuration. The preflight reachability probe opens a plain TCP
/// connection and cannot see those aliases; set `probe_host` to the real
/// address in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub host: String,
    /// Address for the reachability probe when `host` is an ssh alias
    pub probe_host: Option<String>,
    pub user: String,
    pub port: u16,
    /// Directory holding one repository per service
    pub base_path: String,
    pub ssh_key: Option<PathBuf>,
    /// Bound for the reachability probe and the SSH connect timeout
    pub connect_timeout_secs: u64,
}

impl RemoteSettings {
    /// Host the reachability probe connects to
    pub fn probe_address(&self) -> &str {
        self.probe_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(&self.host)
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            host: "rsync-backup".into(),
            probe_host: None,
            user: "root".into(),
            port: 22,
            base_path: "/backups".into(),
            ssh_key: Some(PathBuf::from("/root/.ssh/backup_key")),
            connect_timeout_secs: 5,
        }
    }
}

/// Time budgets for external commands, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub create_secs: u64,
    pub extract_secs: u64,
    pub verify_secs: u64,
    pub list_secs: u64,
    pub prune_secs: u64,
    pub export_secs: u64,
    pub stop_secs: u64,
    pub start_secs: u64,
    pub probe_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create_secs: 3600,
            extract_secs: 3600,
            verify_secs: 300,
            list_secs: 60,
            prune_secs: 600,
            export_secs: 3600,
            stop_secs: 300,
            start_secs: 600,
            probe_secs: 60,
        }
    }
}

/// Archive engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorgSettings {
    /// Local archive tool binary
    pub binary: String,
    /// Archive tool binary name on the remote host
    pub remote_path: Option<String>,
    pub compression: String,
    pub retention: RetentionPolicy,
    pub timeouts: TimeoutSettings,
    /// Reclaim space on the remote after deleting archives
    pub compact_after_prune: bool,
}

impl Default for BorgSettings {
    fn default() -> Self {
        Self {
            binary: "borg".into(),
            remote_path: Some("borg14".into()),
            compression: "zstd,3".into(),
            retention: RetentionPolicy::default(),
            timeouts: TimeoutSettings::default(),
            compact_after_prune: true,
        }
    }
}

/// Where the passphrase comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub env_var: String,
    pub env_files: Vec<PathBuf>,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            env_var: "BORG_PASSPHRASE".into(),
            env_files: vec![
                PathBuf::from("/root/.env"),
                PathBuf::from("/root/sh-scripts/.env"),
            ],
        }
    }
}

/// Local staging area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub local_staging: PathBuf,
    /// Age after which `cleanup` removes staged export bundles
    pub staging_retention_days: u32,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            local_staging: PathBuf::from("/var/backups/local"),
            staging_retention_days: 7,
        }
    }
}

/// Free-space thresholds as written in the file (GiB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinFreeSettings {
    pub backup: Option<u64>,
    pub restore: Option<u64>,
}

/// Per-service overrides; unset fields take the service defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    /// Repository directory name under `remote.base_path`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_free_gb: Option<MinFreeSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_start_wait_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_poll_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_for_backup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excludes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_command: Option<Vec<String>>,
    /// `user:group` to chown the restored tree to; empty string disables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Mail only: export/restore tool, relative to the install path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_tool: Option<PathBuf>,
    /// Mail only: directory-name prefix of export bundles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_prefix: Option<String>,
    /// Mail only: where a restored export bundle is placed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_dir: Option<PathBuf>,
}

/// The three managed services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesSettings {
    pub proxy: ServiceSettings,
    pub mail: ServiceSettings,
    pub app: ServiceSettings,
}

/// Notification delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Command receiving the report on stdin; `{subject}` is substituted.
    /// Empty disables command delivery.
    pub command: Vec<String>,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            notify_on_success: false,
            notify_on_failure: true,
        }
    }
}

/// The settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub borg: BorgSettings,
    pub credentials: CredentialSettings,
    pub backup: BackupSettings,
    pub services: ServicesSettings,
    pub notifications: NotificationSettings,
}

impl Settings {
    /// Load settings from disk, falling back to defaults if the file is absent
    ///
    /// A file that exists but does not parse is an error: running a backup
    /// against guessed settings is worse than not running it.
    pub fn load(path: &Path) -> ManagerResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ManagerError::Io(format!("Failed to read settings file {}: {}", path.display(), e))
        })?;

        let settings: Settings = serde_yaml::from_str(&contents).map_err(|e| {
            ManagerError::Config(format!("Failed to parse settings file {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Save settings to disk, creating the parent directory
    pub fn save(&self, path: &Path) -> ManagerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ManagerError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let contents = serde_yaml::to_string(self)
            .map_err(|e| ManagerError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| ManagerError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Resolve into the immutable per-run configuration
    pub fn resolve(&self) -> ManagerResult<super::resolved::ManagerConfig> {
        super::resolved::ManagerConfig::from_settings(self)
    }
}
