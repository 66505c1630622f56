//! Human-readable renderings of run reports

use std::time::Duration;

use crate::models::{OperationResult, Verification};

/// Format a duration compactly (`850ms`, `42s`, `3m 12s`, `1h 05m`)
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    if total_seconds == 0 {
        return format!("{}ms", duration.as_millis());
    }
    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m {:02}s", minutes, total_seconds % 60);
    }

    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

/// Format a byte count with binary units
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// `[SUCCESS] Backup: proxy on host`
pub fn subject_line(result: &OperationResult, host: &str) -> String {
    format!(
        "[{}] {}: {} on {}",
        if result.success { "SUCCESS" } else { "FAILED" },
        result.kind,
        result.service,
        host
    )
}

fn verification_label(verification: Verification) -> &'static str {
    match verification {
        Verification::NotRun => "not run",
        Verification::Passed => "passed",
        Verification::Failed => "FAILED",
        Verification::Skipped => "skipped",
    }
}

/// Plain-text report used for notification bodies and terminal summaries
pub fn render_report(result: &OperationResult, host: &str) -> String {
    let mut lines = vec![
        format!("{} {} on {}", result.kind, result.service.display_name(), host),
        format!(
            "Status:       {}",
            if result.success { "SUCCESS" } else { "FAILED" }
        ),
        format!("Stage:        {}", result.stage),
        format!(
            "Started:      {}",
            result.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!("Duration:     {}", format_duration(result.duration())),
    ];

    if let Some(archive) = &result.archive {
        lines.push(format!("Archive:      {}", archive));
    }
    if result.verification != Verification::NotRun {
        lines.push(format!(
            "Verification: {}",
            verification_label(result.verification)
        ));
    }
    if let Some(before) = result.counts.archives_before {
        lines.push(format!("Archives:     {} before", before));
    }
    if result.counts.pruned > 0 || result.counts.archives_after.is_some() {
        lines.push(format!(
            "Pruned:       {} ({} remaining)",
            result.counts.pruned,
            result
                .counts
                .archives_after
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into())
        ));
    }
    if let Some(files) = result.counts.files_restored {
        lines.push(format!("Files:        {}", files));
    }
    if let Some(snapshot) = &result.snapshot {
        lines.push(format!("Snapshot:     {}", snapshot.display()));
    }
    if let Some(kind) = result.error {
        lines.push(format!("Error:        {}", kind));
        if let Some(detail) = &result.error_detail {
            lines.push(format!("Detail:       {}", detail));
        }
        lines.push(format!("Next step:    {}", kind.remediation()));
    }
    for note in &result.notes {
        lines.push(format!("Note:         {}", note));
    }
    lines.push(format!("Run ID:       {}", result.run_id));

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ManagerError;
    use crate::models::{OperationKind, ServiceId};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(192)), "3m 12s");
        assert_eq!(format_duration(Duration::from_secs(3900)), "1h 05m");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn test_subject_line() {
        let mut result = OperationResult::new(ServiceId::Mail, OperationKind::Backup);
        assert_eq!(subject_line(&result, "mx1"), "[FAILED] Backup: mail on mx1");
        result.success = true;
        assert_eq!(subject_line(&result, "mx1"), "[SUCCESS] Backup: mail on mx1");
    }

    #[test]
    fn test_report_includes_error_and_remediation() {
        let mut result = OperationResult::new(ServiceId::Proxy, OperationKind::Restore);
        result.archive = Some("proxy-20250101_020000".into());
        result.fail(&ManagerError::NoBackupsFound {
            service: "proxy".into(),
        });
        result.note("nothing at /root/nginx to snapshot");

        let text = render_report(&result, "web1");
        assert!(text.starts_with("Restore nginx Proxy Manager on web1"));
        assert!(text.contains("Archive:      proxy-20250101_020000"));
        assert!(text.contains("Error:        "));
        assert!(text.contains("Next step:    "));
        assert!(text.contains("Note:         nothing at /root/nginx to snapshot"));
    }
}
