//! The archive store contract

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ManagerError, ManagerResult};
use crate::models::{Archive, ArchiveRepository};

/// Operations against one remote, encrypted, deduplicating repository
///
/// Calls are synchronous and block until the engine exits or its time budget
/// runs out.
pub trait ArchiveStore {
    /// Push a new archive named `label` holding `sources`
    fn create(
        &self,
        repo: &ArchiveRepository,
        sources: &[PathBuf],
        excludes: &[String],
        label: &str,
    ) -> ManagerResult<Archive>;

    /// Every archive in the repository, newest first
    ///
    /// A repository that does not exist yet yields an empty list.
    fn list(&self, repo: &ArchiveRepository) -> ManagerResult<Vec<Archive>>;

    /// Whether the named archive can be listed and holds at least one entry
    fn verify(&self, repo: &ArchiveRepository, archive: &str) -> ManagerResult<bool>;

    /// Extract into `destination`, which must be an existing empty directory
    ///
    /// Returns the number of files written.
    fn extract(
        &self,
        repo: &ArchiveRepository,
        archive: &str,
        destination: &Path,
    ) -> ManagerResult<u64>;

    /// Delete the archives of `listed` whose names are not in `keep`
    ///
    /// Only `listed` is considered: an archive created after that listing
    /// was taken is never a candidate. Returns the names deleted by this
    /// call; a second call with the same arguments deletes nothing.
    fn prune_listed(
        &self,
        repo: &ArchiveRepository,
        listed: &[Archive],
        keep: &BTreeSet<String>,
    ) -> ManagerResult<Vec<String>>;

    /// Delete every archive whose name is not in `keep`
    fn prune(
        &self,
        repo: &ArchiveRepository,
        keep: &BTreeSet<String>,
    ) -> ManagerResult<Vec<String>> {
        let listed = self.list(repo)?;
        self.prune_listed(repo, &listed, keep)
    }
}

impl<S: ArchiveStore + ?Sized> ArchiveStore for &S {
    fn create(
        &self,
        repo: &ArchiveRepository,
        sources: &[PathBuf],
        excludes: &[String],
        label: &str,
    ) -> ManagerResult<Archive> {
        (**self).create(repo, sources, excludes, label)
    }

    fn list(&self, repo: &ArchiveRepository) -> ManagerResult<Vec<Archive>> {
        (**self).list(repo)
    }

    fn verify(&self, repo: &ArchiveRepository, archive: &str) -> ManagerResult<bool> {
        (**self).verify(repo, archive)
    }

    fn extract(
        &self,
        repo: &ArchiveRepository,
        archive: &str,
        destination: &Path,
    ) -> ManagerResult<u64> {
        (**self).extract(repo, archive, destination)
    }

    fn prune_listed(
        &self,
        repo: &ArchiveRepository,
        listed: &[Archive],
        keep: &BTreeSet<String>,
    ) -> ManagerResult<Vec<String>> {
        (**self).prune_listed(repo, listed, keep)
    }

    fn prune(
        &self,
        repo: &ArchiveRepository,
        keep: &BTreeSet<String>,
    ) -> ManagerResult<Vec<String>> {
        (**self).prune(repo, keep)
    }
}

/// Ensure `destination` is an existing, empty directory
pub(crate) fn require_empty_dir(destination: &Path) -> ManagerResult<()> {
    if !destination.is_dir() {
        return Err(ManagerError::path_not_found(destination));
    }
    let mut entries = fs::read_dir(destination).map_err(|e| {
        ManagerError::Io(format!("Failed to read {}: {}", destination.display(), e))
    })?;
    if entries.next().is_some() {
        return Err(ManagerError::Validation(format!(
            "Extraction target is not empty: {}",
            destination.display()
        )));
    }
    Ok(())
}

/// Count regular files (and symlinks) below `root`
pub fn count_files(root: &Path) -> ManagerResult<u64> {
    let mut count = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir)
            .map_err(|e| ManagerError::Io(format!("Failed to read {}: {}", dir.display(), e)))?;
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_count_files_recurses() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("top.txt"), "x").unwrap();
        fs::write(temp.path().join("a/one"), "x").unwrap();
        fs::write(temp.path().join("a/b/two"), "x").unwrap();
        assert_eq!(count_files(temp.path()).unwrap(), 3);
    }

    #[test]
    fn test_require_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert!(require_empty_dir(temp.path()).is_ok());

        fs::write(temp.path().join("f"), "x").unwrap();
        assert!(require_empty_dir(temp.path()).unwrap_err().is_validation());
        assert!(require_empty_dir(&temp.path().join("missing"))
            .unwrap_err()
            .is_not_found());
    }
}
