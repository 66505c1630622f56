//! Append-only run history
//!
//! Every finished run is written as one JSON line to `logs/history.jsonl`
//! and flushed immediately.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{ManagerError, ManagerResult};
use crate::models::OperationResult;

use super::notifier::Notifier;

/// Writes and reads the JSONL run history
pub struct JournalNotifier {
    log_path: PathBuf,
}

impl JournalNotifier {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append one result
    pub fn append(&self, result: &OperationResult) -> ManagerResult<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ManagerError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| ManagerError::Io(format!("Failed to open run history: {}", e)))?;

        let json = serde_json::to_string(result)
            .map_err(|e| ManagerError::Json(format!("Failed to serialize run result: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| ManagerError::Io(format!("Failed to write run history: {}", e)))?;

        file.flush()
            .map_err(|e| ManagerError::Io(format!("Failed to flush run history: {}", e)))?;

        Ok(())
    }

    /// Read every recorded run, oldest first
    ///
    /// Lines that fail to parse (a torn write after a crash) are skipped
    /// with a warning instead of hiding the rest of the history.
    pub fn read_all(&self) -> ManagerResult<Vec<OperationResult>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| ManagerError::Io(format!("Failed to open run history: {}", e)))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                ManagerError::Io(format!(
                    "Failed to read run history line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<OperationResult>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(line = line_num + 1, error = %e, "skipping unreadable history entry")
                }
            }
        }

        Ok(entries)
    }

    /// The most recent `count` runs, oldest first
    pub fn read_recent(&self, count: usize) -> ManagerResult<Vec<OperationResult>> {
        let all_entries = self.read_all()?;
        let start = all_entries.len().saturating_sub(count);
        Ok(all_entries[start..].to_vec())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

impl Notifier for JournalNotifier {
    fn notify(&self, result: &OperationResult) -> ManagerResult<()> {
        self.append(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationKind, ServiceId};
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_back() {
        let temp = TempDir::new().unwrap();
        let journal = JournalNotifier::new(temp.path().join("logs/history.jsonl"));

        let mut first = OperationResult::new(ServiceId::Proxy, OperationKind::Backup);
        first.success = true;
        let second = OperationResult::new(ServiceId::Mail, OperationKind::Restore);

        journal.append(&first).unwrap();
        journal.append(&second).unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run_id, first.run_id);
        assert!(entries[0].success);
        assert_eq!(entries[1].service, ServiceId::Mail);
    }

    #[test]
    fn test_read_recent_keeps_order() {
        let temp = TempDir::new().unwrap();
        let journal = JournalNotifier::new(temp.path().join("history.jsonl"));
        let ids: Vec<_> = (0..5)
            .map(|_| {
                let result = OperationResult::new(ServiceId::App, OperationKind::Backup);
                journal.append(&result).unwrap();
                result.run_id
            })
            .collect();

        let recent = journal.read_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, ids[3]);
        assert_eq!(recent[1].run_id, ids[4]);
    }

    #[test]
    fn test_missing_file_is_empty_and_torn_lines_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.jsonl");
        let journal = JournalNotifier::new(path.clone());
        assert!(journal.read_all().unwrap().is_empty());

        journal
            .append(&OperationResult::new(ServiceId::App, OperationKind::Backup))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"run_id\":").unwrap();

        assert_eq!(journal.read_all().unwrap().len(), 1);
    }
}
