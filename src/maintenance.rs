//! Local staging cleanup
//!
//! Removes export bundles left in the staging area by earlier mail backups,
//! and staged mail restore bundles a failed restore left behind (including
//! moved-aside copies of them). Safety snapshots of installations live next
//! to the installation, not in staging, and are never touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::models::ServiceId;

const SNAPSHOT_MARKER: &str = ".pre-restore.";

/// What a cleanup pass removed (or would remove)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub bytes_freed: u64,
}

/// Total size of regular files below `path`
pub fn tree_size(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| tree_size(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}

fn is_stale_bundle(path: &Path, prefix: &str, cutoff: SystemTime) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return false;
    };
    if !name.starts_with(prefix) || name.contains(SNAPSHOT_MARKER) {
        return false;
    }
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => meta.modified().map(|m| m <= cutoff).unwrap_or(false),
        _ => false,
    }
}

/// The staged mail restore bundle, or a moved-aside copy of it
fn is_stale_restore_bundle(path: &Path, restore_target: &Path, cutoff: SystemTime) -> bool {
    let (Some(name), Some(base)) = (path.file_name(), restore_target.file_name()) else {
        return false;
    };
    if path.parent() != restore_target.parent() {
        return false;
    }
    let name = name.to_string_lossy();
    let base = base.to_string_lossy();
    let matches = name == base || name.starts_with(&format!("{}{}", base, SNAPSHOT_MARKER));
    if !matches {
        return false;
    }
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => meta.modified().map(|m| m <= cutoff).unwrap_or(false),
        _ => false,
    }
}

/// Remove staged export bundles older than `days`
///
/// `now` is injected so tests can age bundles without touching mtimes.
pub fn cleanup_staging(
    config: &ManagerConfig,
    days: u32,
    now: SystemTime,
    dry_run: bool,
) -> ManagerResult<CleanupReport> {
    let cutoff = now
        .checked_sub(Duration::from_secs(u64::from(days) * 24 * 60 * 60))
        .ok_or_else(|| ManagerError::Validation(format!("Retention of {} days is out of range", days)))?;
    let prefix = &config.mail_profile.bundle_prefix;
    let mail = config.service(ServiceId::Mail);
    let mut report = CleanupReport::default();

    let mut dirs: Vec<&Path> = ServiceId::ALL
        .iter()
        .map(|&id| config.service(id).staging_dir.as_path())
        .collect();
    if !mail.restores_install_dir() {
        if let Some(parent) = mail.restore_target.parent() {
            if !dirs.contains(&parent) {
                dirs.push(parent);
            }
        }
    }

    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let stale = is_stale_bundle(&path, prefix, cutoff)
                || (!mail.restores_install_dir()
                    && is_stale_restore_bundle(&path, &mail.restore_target, cutoff));
            if !stale {
                continue;
            }
            let size = tree_size(&path);
            if dry_run {
                report.removed.push(path);
                report.bytes_freed += size;
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed stale staging bundle");
                    report.bytes_freed += size;
                    report.removed.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove staging bundle");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
    }

    report.removed.sort();
    Ok(report)
}
