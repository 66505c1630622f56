//! Archive and repository models
//!
//! A repository is the remote namespace holding every archive of one
//! service. Archives are immutable once created; pruning removes whole
//! archives and never rewrites one.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::service::ServiceId;
use crate::error::{ManagerError, ManagerResult};

/// Timestamp format embedded in archive names
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const MAX_ARCHIVE_NAME_LEN: usize = 200;

/// Remote repository for one managed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRepository {
    pub service: ServiceId,
    /// SSH host; empty for a repository on a local path
    pub host: String,
    pub user: String,
    pub port: u16,
    /// Repository path relative to the remote home
    pub path: String,
    /// Name under which the credential collaborator holds the passphrase
    pub credential_ref: String,
    /// Compression spec handed to the archive tool (e.g. `zstd,3`)
    pub compression: String,
}

impl ArchiveRepository {
    /// Location string understood by the archive tool
    ///
    /// Uses the `ssh://host/./path` form, which resolves relative to the
    /// remote home directory.
    pub fn url(&self) -> String {
        let path = self.path.trim_start_matches('/');
        if self.host.is_empty() {
            return format!("/{}", path);
        }
        let authority = if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        };
        if self.port == 22 {
            format!("ssh://{}/./{}", authority, path)
        } else {
            format!("ssh://{}:{}/./{}", authority, self.port, path)
        }
    }

    /// `repo::archive` locator for a single archive
    pub fn archive_locator(&self, archive: &str) -> String {
        format!("{}::{}", self.url(), archive)
    }
}

/// One immutable snapshot inside a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Service prefix plus timestamp; sorts lexically by age
    pub name: String,
    /// Creation time (host wall clock, as recorded by the archive tool)
    pub created_at: NaiveDateTime,
    /// Original size in bytes, when the archive tool reported it
    pub size_bytes: Option<u64>,
    /// Set once a listing of this archive succeeded in the current run
    pub verified: bool,
}

impl Archive {
    pub fn new(name: impl Into<String>, created_at: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            created_at,
            size_bytes: None,
            verified: false,
        }
    }

    /// Build an archive from its name alone, parsing the embedded timestamp
    pub fn from_name(name: &str) -> Option<Self> {
        let created_at = parse_archive_timestamp(name)?;
        Some(Self::new(name, created_at))
    }
}

/// Keep-counts governing pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

impl RetentionPolicy {
    /// Upper bound on how many archives the policy can retain
    pub fn max_kept(&self) -> usize {
        self.daily as usize + self.weekly as usize + self.monthly as usize
    }

    /// A policy of all zeros would delete everything
    pub fn is_empty(&self) -> bool {
        self.max_kept() == 0
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 6,
        }
    }
}

/// Label for a new archive: `<service>-YYYYmmdd_HHMMSS`
pub fn archive_label(service: ServiceId, at: NaiveDateTime) -> String {
    let at = at.with_nanosecond(0).unwrap_or(at);
    format!("{}-{}", service.as_str(), at.format(ARCHIVE_TIMESTAMP_FORMAT))
}

/// Parse the trailing `YYYYmmdd_HHMMSS` part of an archive name
pub fn parse_archive_timestamp(name: &str) -> Option<NaiveDateTime> {
    let stamp_len = "YYYYmmdd_HHMMSS".len();
    if name.len() < stamp_len {
        return None;
    }
    let stamp = name.get(name.len() - stamp_len..)?;
    NaiveDateTime::parse_from_str(stamp, ARCHIVE_TIMESTAMP_FORMAT).ok()
}

/// Reject archive names that could be misread by the archive tool
///
/// Names reach the tool as a single argument, so the check guards against
/// `repo::archive` confusion and option injection rather than shell quoting.
pub fn validate_archive_name(name: &str) -> ManagerResult<()> {
    if name.is_empty() {
        return Err(ManagerError::Validation("Archive name cannot be empty".into()));
    }
    if name.len() > MAX_ARCHIVE_NAME_LEN {
        return Err(ManagerError::Validation(format!(
            "Archive name is longer than {} characters",
            MAX_ARCHIVE_NAME_LEN
        )));
    }
    if name.starts_with('-') {
        return Err(ManagerError::Validation(format!(
            "Archive name cannot start with '-': {}",
            name
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ManagerError::Validation(format!(
            "Archive name contains invalid character '{}': {}",
            bad, name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn repo(host: &str, port: u16) -> ArchiveRepository {
        ArchiveRepository {
            service: ServiceId::Proxy,
            host: host.into(),
            user: "root".into(),
            port,
            path: "/backups/nginx-backup".into(),
            credential_ref: "BORG_PASSPHRASE".into(),
            compression: "zstd,3".into(),
        }
    }

    #[test]
    fn test_repository_url_forms() {
        assert_eq!(
            repo("rsync-backup", 22).url(),
            "ssh://root@rsync-backup/./backups/nginx-backup"
        );
        assert_eq!(
            repo("rsync-backup", 2222).url(),
            "ssh://root@rsync-backup:2222/./backups/nginx-backup"
        );
        assert_eq!(repo("", 22).url(), "/backups/nginx-backup");
        assert_eq!(
            repo("h", 22).archive_locator("proxy-20250101_020000"),
            "ssh://root@h/./backups/nginx-backup::proxy-20250101_020000"
        );
    }

    #[test]
    fn test_archive_label_and_parse() {
        let at = NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_milli_opt(2, 0, 0, 450)
            .unwrap();
        let label = archive_label(ServiceId::App, at);
        assert_eq!(label, "app-20250102_020000");

        let archive = Archive::from_name(&label).unwrap();
        assert_eq!(archive.created_at, at.with_nanosecond(0).unwrap());
        assert!(!archive.verified);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_archive_timestamp("host-nginx-2025-01-01_02-00-00").is_none());
        assert!(parse_archive_timestamp("short").is_none());
    }

    #[test]
    fn test_validate_archive_name() {
        assert!(validate_archive_name("mail-20250101_020000").is_ok());
        assert!(validate_archive_name("").is_err());
        assert!(validate_archive_name("--glob-archives=*").is_err());
        assert!(validate_archive_name("a::b").is_err());
        assert!(validate_archive_name("a; rm -rf /").is_err());
        assert!(validate_archive_name(&"a".repeat(201)).is_err());
    }

    #[test]
    fn test_retention_bounds() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_kept(), 17);
        assert!(!policy.is_empty());
        assert!(RetentionPolicy {
            daily: 0,
            weekly: 0,
            monthly: 0
        }
        .is_empty());
    }
}
