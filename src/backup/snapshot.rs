//! Pre-restore safety snapshots
//!
//! A snapshot is the previous installation at
//! `<target>.pre-restore.<YYYYmmdd_HHMMSS>`. When the restore replaces the
//! directory itself it is renamed there: atomic on one filesystem, no extra
//! space, and the previous state is either fully at the old path or fully
//! at the snapshot path. When the restore rewrites the installation in
//! place (the mail restore tool) it is copied instead. Snapshots are never
//! deleted by this tool.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{ManagerError, ManagerResult};
use crate::models::ARCHIVE_TIMESTAMP_FORMAT;

const SNAPSHOT_MARKER: &str = ".pre-restore.";

/// A moved-aside copy of a restore target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetySnapshot {
    /// Where the data lived before the restore
    pub original: PathBuf,
    /// Where it lives now
    pub path: PathBuf,
    pub taken_at: NaiveDateTime,
}

impl SafetySnapshot {
    /// Move `target` aside
    ///
    /// Returns `Ok(None)` when there is nothing at `target` (fresh install).
    pub fn take(target: &Path, at: NaiveDateTime) -> ManagerResult<Option<Self>> {
        if fs::symlink_metadata(target).is_err() {
            tracing::info!(target = %target.display(), "nothing to snapshot");
            return Ok(None);
        }

        let path = free_snapshot_path(target, at);
        fs::rename(target, &path).map_err(|e| {
            ManagerError::Snapshot(format!(
                "Failed to move {} to {}: {}",
                target.display(),
                path.display(),
                e
            ))
        })?;

        if !path.exists() {
            return Err(ManagerError::Snapshot(format!(
                "Snapshot not found after move: {}",
                path.display()
            )));
        }

        tracing::info!(snapshot = %path.display(), "safety snapshot taken");
        Ok(Some(Self {
            original: target.to_path_buf(),
            path,
            taken_at: at,
        }))
    }

    /// Copy `target` aside, leaving it in place
    ///
    /// Symlinks are copied as links. A partial copy is removed before the
    /// error is returned. Returns `Ok(None)` when there is nothing at
    /// `target`.
    pub fn copy(target: &Path, at: NaiveDateTime) -> ManagerResult<Option<Self>> {
        if fs::symlink_metadata(target).is_err() {
            tracing::info!(target = %target.display(), "nothing to snapshot");
            return Ok(None);
        }

        let path = free_snapshot_path(target, at);
        if let Err(e) = copy_tree(target, &path) {
            if let Err(cleanup) = remove_tree(&path) {
                tracing::warn!(path = %path.display(), error = %cleanup, "could not remove partial snapshot");
            }
            return Err(ManagerError::Snapshot(format!(
                "Failed to copy {} to {}: {}",
                target.display(),
                path.display(),
                e
            )));
        }

        tracing::info!(snapshot = %path.display(), "safety snapshot copied");
        Ok(Some(Self {
            original: target.to_path_buf(),
            path,
            taken_at: at,
        }))
    }
}

/// `<target>.pre-restore.<ts>`, with a numeric suffix if already taken
fn free_snapshot_path(target: &Path, at: NaiveDateTime) -> PathBuf {
    let base = format!(
        "{}{}{}",
        target.display(),
        SNAPSHOT_MARKER,
        at.format(ARCHIVE_TIMESTAMP_FORMAT)
    );
    let mut path = PathBuf::from(&base);
    let mut attempt = 1;
    while fs::symlink_metadata(&path).is_ok() {
        path = PathBuf::from(format!("{}-{}", base, attempt));
        attempt += 1;
    }
    path
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        symlink(fs::read_link(from)?, to)
    } else if file_type.is_dir() {
        fs::create_dir(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_tree(&entry.path(), &to.join(entry.file_name()))?;
        }
        fs::set_permissions(to, meta.permissions())
    } else if file_type.is_file() {
        fs::copy(from, to).map(|_| ())
    } else {
        // sockets and fifos belong to the running service
        tracing::debug!(path = %from.display(), "skipping special file");
        Ok(())
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Every safety snapshot of `target`, newest first
pub fn list_snapshots(target: &Path) -> ManagerResult<Vec<SafetySnapshot>> {
    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Ok(Vec::new());
    };
    if !parent.is_dir() {
        return Ok(Vec::new());
    }

    let prefix = format!("{}{}", name.to_string_lossy(), SNAPSHOT_MARKER);
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(stamp) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        let stamp = stamp.get(..15).unwrap_or(stamp);
        if let Ok(taken_at) = NaiveDateTime::parse_from_str(stamp, ARCHIVE_TIMESTAMP_FORMAT) {
            snapshots.push(SafetySnapshot {
                original: target.to_path_buf(),
                path: entry.path(),
                taken_at,
            });
        }
    }

    snapshots.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then_with(|| b.path.cmp(&a.path)));
    Ok(snapshots)
}
