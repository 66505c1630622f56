//! Run history and safety snapshot tables

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::SafetySnapshot;
use crate::models::OperationResult;
use crate::report::{format_duration, format_size};

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Started (UTC)")]
    started: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Archive")]
    archive: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

/// Recorded runs, as read from the history file
pub fn format_history(entries: &[OperationResult]) -> String {
    if entries.is_empty() {
        return "No runs recorded yet.".to_string();
    }

    let rows = entries.iter().map(|e| HistoryRow {
        started: e.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        service: e.service.to_string(),
        kind: e.kind.to_string(),
        result: match (e.success, e.error) {
            (true, _) => "ok".to_string(),
            (false, Some(kind)) => kind.to_string(),
            (false, None) => "failed".to_string(),
        },
        archive: e.archive.clone().unwrap_or_else(|| "-".into()),
        duration: format_duration(e.duration()),
    });
    Table::new(rows).with(Style::psql()).to_string()
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Taken")]
    taken: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Safety snapshots with their on-disk size
pub fn format_snapshots(snapshots: &[(SafetySnapshot, u64)]) -> String {
    if snapshots.is_empty() {
        return "No safety snapshots found.".to_string();
    }

    let rows = snapshots.iter().map(|(s, size)| SnapshotRow {
        taken: s.taken_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        path: s.path.display().to_string(),
        size: format_size(*size),
    });
    Table::new(rows).with(Style::psql()).to_string()
}
