//! Custom error types for server-manager
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. Every variant maps onto an [`ErrorKind`],
//! the serializable tag that travels inside an operation report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for server-manager operations
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Invalid user input (archive names, backup kinds, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// One or more preflight conditions failed
    #[error("Preflight failed: {}", .0.join("; "))]
    Preflight(Vec<String>),

    /// The archive tool refused to create an archive
    #[error("Archive creation failed for '{archive}': {stderr_tail}")]
    ArchiveCreate {
        archive: String,
        stderr_tail: String,
    },

    /// The remote repository could not be reached
    #[error("Cannot reach repository {repository}: {detail}")]
    Connectivity { repository: String, detail: String },

    /// The repository rejected the passphrase or key
    #[error("Authentication failed for repository {repository}: {detail}")]
    Auth { repository: String, detail: String },

    /// Transport succeeded but the archive content failed integrity checks
    #[error("Archive '{archive}' is corrupt: {detail}")]
    CorruptArchive { archive: String, detail: String },

    /// Another create/prune holds the repository lock
    #[error("Repository {repository} is locked by another operation")]
    RepositoryLocked { repository: String },

    /// The repository exists but holds no archives (or does not exist yet)
    #[error("No backups found for {service}")]
    NoBackupsFound { service: String },

    /// The health probe never succeeded within the wait window
    #[error("{service}: service did not confirm healthy within {waited_secs}s")]
    ServiceHealthTimeout { service: String, waited_secs: u64 },

    /// A stop/start command failed
    #[error("Service control failed for {service}: {detail}")]
    ServiceControl { service: String, detail: String },

    /// The service-specific post-restore step failed
    #[error("Post-restore fixup failed for {service}: {detail}")]
    Fixup { service: String, detail: String },

    /// The pre-restore safety snapshot could not be taken
    #[error("Safety snapshot failed: {0}")]
    Snapshot(String),

    /// An external command exited unsuccessfully
    #[error("Command `{program}` failed (exit code {code:?}): {stderr_tail}")]
    Command {
        program: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    /// An external command exceeded its time budget and was killed
    #[error("Command `{program}` timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

impl ManagerError {
    /// Create a "not found" error for archives
    pub fn archive_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Archive",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for paths on disk
    pub fn path_not_found(path: &std::path::Path) -> Self {
        Self::NotFound {
            entity_type: "Path",
            identifier: path.display().to_string(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether a later retry by the operator may succeed unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RepositoryLocked { .. } | Self::Connectivity { .. } | Self::Timeout { .. }
        )
    }

    /// The taxonomy tag recorded in operation reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Yaml(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Preflight(_) => ErrorKind::Preflight,
            Self::ArchiveCreate { .. } => ErrorKind::ArchiveCreate,
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            Self::RepositoryLocked { .. } => ErrorKind::RepositoryLocked,
            Self::NoBackupsFound { .. } => ErrorKind::NoBackupsFound,
            Self::ServiceHealthTimeout { .. } => ErrorKind::ServiceHealthTimeout,
            Self::ServiceControl { .. } => ErrorKind::ServiceControl,
            Self::Fixup { .. } => ErrorKind::Fixup,
            Self::Snapshot(_) => ErrorKind::Snapshot,
            Self::Command { .. } => ErrorKind::Command,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Serializable error classification carried by an `OperationResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "PreflightError")]
    Preflight,
    #[serde(rename = "ArchiveCreateError")]
    ArchiveCreate,
    #[serde(rename = "ConnectivityError")]
    Connectivity,
    #[serde(rename = "AuthError")]
    Auth,
    #[serde(rename = "CorruptArchiveError")]
    CorruptArchive,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "RepositoryLockedError")]
    RepositoryLocked,
    #[serde(rename = "NoBackupsFoundError")]
    NoBackupsFound,
    #[serde(rename = "ServiceHealthTimeout")]
    ServiceHealthTimeout,
    #[serde(rename = "ServiceControlError")]
    ServiceControl,
    #[serde(rename = "FixupError")]
    Fixup,
    #[serde(rename = "SnapshotError")]
    Snapshot,
    #[serde(rename = "CommandError")]
    Command,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "ConfigError")]
    Config,
    #[serde(rename = "IoError")]
    Io,
    #[serde(rename = "ValidationError")]
    Validation,
}

impl ErrorKind {
    /// Short operator-facing hint on what to look at next
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::Preflight => {
                "Free local disk space, check the SSH route to the backup host and make sure the passphrase is available"
            }
            ErrorKind::ArchiveCreate => {
                "Inspect the archive tool output above; the source path may be missing or unreadable"
            }
            ErrorKind::Connectivity => "Check network access and the SSH key for the backup host",
            ErrorKind::Auth => "Check that the repository passphrase is correct",
            ErrorKind::CorruptArchive => {
                "Run a repository check on the backup host and pick an older archive"
            }
            ErrorKind::NotFound => "List available archives and retry with an existing name",
            ErrorKind::RepositoryLocked => {
                "Another operation is using the repository; retry once it has finished"
            }
            ErrorKind::NoBackupsFound => "Create a backup first; the repository holds no archives",
            ErrorKind::ServiceHealthTimeout => {
                "Files are in place; inspect the service logs and start it manually if needed"
            }
            ErrorKind::ServiceControl => "Inspect the container runtime and the service directory",
            ErrorKind::Fixup => {
                "The safety snapshot is untouched; restore it manually or rerun the service restore tool"
            }
            ErrorKind::Snapshot => "Nothing was changed; check permissions on the install directory",
            ErrorKind::Command => "Inspect the command output in the log",
            ErrorKind::Timeout => "The remote side may be hung; check the backup host and retry",
            ErrorKind::Config => "Fix the settings file",
            ErrorKind::Io => "Check filesystem permissions and free space",
            ErrorKind::Validation => "Correct the input and retry",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Preflight => "PreflightError",
            ErrorKind::ArchiveCreate => "ArchiveCreateError",
            ErrorKind::Connectivity => "ConnectivityError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::CorruptArchive => "CorruptArchiveError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::RepositoryLocked => "RepositoryLockedError",
            ErrorKind::NoBackupsFound => "NoBackupsFoundError",
            ErrorKind::ServiceHealthTimeout => "ServiceHealthTimeout",
            ErrorKind::ServiceControl => "ServiceControlError",
            ErrorKind::Fixup => "FixupError",
            ErrorKind::Snapshot => "SnapshotError",
            ErrorKind::Command => "CommandError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Io => "IoError",
            ErrorKind::Validation => "ValidationError",
        };
        f.write_str(name)
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for ManagerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for ManagerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

/// Result type alias for server-manager operations
pub type ManagerResult<T> = Result<T, ManagerError>;
