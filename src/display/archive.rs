//! Archive, prune-plan and status tables

use std::collections::BTreeSet;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::models::{Archive, ServiceId};
use crate::report::format_size;

#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Archive")]
    name: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Archives, newest first, numbered from 1
pub fn format_archive_list(archives: &[Archive]) -> String {
    if archives.is_empty() {
        return "No archives found.".to_string();
    }

    let rows = archives.iter().enumerate().map(|(i, a)| ArchiveRow {
        index: i + 1,
        name: a.name.clone(),
        created: a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        size: a.size_bytes.map(format_size).unwrap_or_else(|| "-".into()),
    });
    Table::new(rows).with(Style::psql()).to_string()
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Archive")]
    name: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Action")]
    action: &'static str,
}

/// Retention plan: which archives stay and which go
pub fn format_prune_plan(archives: &[Archive], keep: &BTreeSet<String>) -> String {
    if archives.is_empty() {
        return "No archives found.".to_string();
    }

    let rows = archives.iter().map(|a| PlanRow {
        name: a.name.clone(),
        created: a.created_at.format("%Y-%m-%d %H:%M").to_string(),
        action: if keep.contains(&a.name) { "keep" } else { "DELETE" },
    });
    let deleting = archives.iter().filter(|a| !keep.contains(&a.name)).count();
    format!(
        "{}\n{} to keep, {} to delete",
        Table::new(rows).with(Style::psql()),
        archives.len() - deleting,
        deleting
    )
}

/// One line of the `status` overview
pub struct StatusLine {
    pub service: ServiceId,
    pub repository: String,
    /// Archive count and newest archive, or the reason the listing failed
    pub listing: Result<(usize, Option<Archive>), String>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Repository")]
    repository: String,
    #[tabled(rename = "Archives")]
    count: String,
    #[tabled(rename = "Latest")]
    latest: String,
}

pub fn format_status(lines: &[StatusLine]) -> String {
    let rows = lines.iter().map(|line| {
        let (count, latest) = match &line.listing {
            Ok((count, latest)) => (
                count.to_string(),
                latest
                    .as_ref()
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| "-".into()),
            ),
            Err(reason) => ("?".into(), reason.clone()),
        };
        StatusRow {
            service: line.service.display_name().to_string(),
            repository: line.repository.clone(),
            count,
            latest,
        }
    });
    Table::new(rows).with(Style::psql()).to_string()
}
