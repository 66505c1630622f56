//! Managed service model
//!
//! The three stateful services this tool protects, and the immutable
//! per-run description of each one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Identifier of a managed service
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    /// Reverse-proxy admin tool (nginx Proxy Manager)
    Proxy,
    /// Mail server (Mailcow)
    Mail,
    /// This management application
    App,
}

impl ServiceId {
    /// All managed services, in display order
    pub const ALL: [ServiceId; 3] = [ServiceId::Proxy, ServiceId::Mail, ServiceId::App];

    /// Short identifier used in archive labels and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Mail => "mail",
            Self::App => "app",
        }
    }

    /// Human-readable product name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Proxy => "nginx Proxy Manager",
            Self::Mail => "Mailcow",
            Self::App => "Server Manager",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceId {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proxy" | "nginx" => Ok(Self::Proxy),
            "mail" | "mailcow" => Ok(Self::Mail),
            "app" | "application" | "server-manager" => Ok(Self::App),
            other => Err(ManagerError::Validation(format!(
                "Unknown service '{}'; expected proxy, mail or app",
                other
            ))),
        }
    }
}

/// Which mutating operation a preflight check guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Backup,
    Restore,
    /// Deleting archives; writes nothing locally
    Prune,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Backup => write!(f, "backup"),
            Operation::Restore => write!(f, "restore"),
            Operation::Prune => write!(f, "prune"),
        }
    }
}

/// Minimum free local space per operation, in GiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceThresholds {
    pub backup: u64,
    pub restore: u64,
}

impl SpaceThresholds {
    /// Threshold in bytes for an operation
    pub fn bytes_for(&self, operation: Operation) -> u64 {
        let gib = match operation {
            Operation::Backup => self.backup,
            Operation::Restore => self.restore,
            Operation::Prune => 0,
        };
        gib.saturating_mul(1024 * 1024 * 1024)
    }
}

/// A service under management, resolved from configuration
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct ManagedService {
    pub id: ServiceId,
    /// Directory holding the service installation (compose file, data)
    pub install_path: PathBuf,
    /// Directory a restore places the archive payload at
    ///
    /// Equal to `install_path` for services whose archive is the installation
    /// itself; the mail service restores an export bundle instead.
    pub restore_target: PathBuf,
    /// Per-service local staging directory
    pub staging_dir: PathBuf,
    /// Compose project name, pinned so lifecycle commands keep working
    /// while the install directory is moved aside
    pub project_name: String,
    pub stop_command: Vec<String>,
    pub start_command: Vec<String>,
    pub status_command: Vec<String>,
    pub health_command: Vec<String>,
    pub min_free: SpaceThresholds,
    pub post_start_wait: Duration,
    pub health_poll_interval: Duration,
    /// Stop the service around archive creation
    pub stop_for_backup: bool,
    pub excludes: Vec<String>,
    /// `user:group` applied recursively after a restore
    pub owner: Option<String>,
}

impl ManagedService {
    /// Whether a restore replaces the installation directory itself
    pub fn restores_install_dir(&self) -> bool {
        self.restore_target == self.install_path
    }

    /// Nearest existing ancestor of `path`, used for free-space checks
    pub fn existing_ancestor(path: &Path) -> Option<PathBuf> {
        path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
    }
}
