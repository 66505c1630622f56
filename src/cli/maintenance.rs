//! Cleanup, history and configuration commands

use std::time::SystemTime;

use crate::config::Settings;
use crate::credential::CredentialProvider;
use crate::display::format_history;
use crate::error::ManagerResult;
use crate::maintenance::cleanup_staging;
use crate::models::ServiceId;
use crate::report::format_size;

use super::CliContext;

/// Remove stale staged export bundles
pub fn handle_cleanup(ctx: &CliContext, days: Option<u32>, dry_run: bool) -> ManagerResult<()> {
    let days = days.unwrap_or(ctx.config.staging_retention_days);
    println!(
        "Removing staged exports older than {} day(s) from {}{}",
        days,
        ctx.config.staging_root.display(),
        if dry_run { " (dry run)" } else { "" }
    );

    let report = cleanup_staging(&ctx.config, days, SystemTime::now(), dry_run)?;
    for path in &report.removed {
        println!("  {} {}", if dry_run { "would remove" } else { "removed" }, path.display());
    }
    for (path, reason) in &report.failed {
        println!("  FAILED {}: {}", path.display(), reason);
    }
    println!(
        "{} bundle(s), {} {}",
        report.removed.len(),
        format_size(report.bytes_freed),
        if dry_run { "reclaimable" } else { "freed" }
    );
    Ok(())
}

pub fn handle_history(ctx: &CliContext, count: usize) -> ManagerResult<()> {
    let journal = ctx.journal();
    let entries = journal.read_recent(count)?;
    println!("{}", format_history(&entries));
    Ok(())
}

/// Print paths and the resolved configuration; the passphrase itself is
/// never shown
///
/// With `init`, the effective settings are written to the settings file if
/// it does not exist yet.
pub fn handle_config(ctx: &CliContext, settings: &Settings, init: bool) -> ManagerResult<()> {
    let config = &ctx.config;

    if init {
        ctx.paths.ensure_directories()?;
        let path = ctx.paths.settings_file();
        if path.exists() {
            println!("Settings file already exists: {}", path.display());
        } else {
            settings.save(&path)?;
            println!("Settings written to {}", path.display());
        }
        println!();
    }

    println!("Server Manager Configuration");
    println!("============================");
    println!("Home directory:  {}", ctx.paths.base_dir().display());
    println!("Settings file:   {}", ctx.paths.settings_file().display());
    println!("Run history:     {}", ctx.paths.history_file().display());
    println!("Staging root:    {}", config.staging_root.display());
    println!();
    println!("Remote:          {}@{}:{}", config.remote.user, config.remote.host, config.remote.port);
    println!("Archive tool:    {}", config.archive_tool.binary);
    println!(
        "Retention:       {} daily, {} weekly, {} monthly",
        config.retention.daily, config.retention.weekly, config.retention.monthly
    );
    let credential = match ctx.credentials().passphrase() {
        Ok(Some(secret)) if !secret.is_blank() => "available",
        Ok(_) => "MISSING",
        Err(_) => "unreadable",
    };
    println!("Passphrase:      {} ({})", credential, config.credential_ref);
    println!();

    for id in ServiceId::ALL {
        let service = config.service(id);
        println!("{} [{}]", id.display_name(), id);
        println!("  Install path:   {}", service.install_path.display());
        println!("  Restore target: {}", service.restore_target.display());
        println!("  Repository:     {}", config.repository(id).url());
        println!(
            "  Min free:       {} GB backup, {} GB restore",
            service.min_free.backup, service.min_free.restore
        );
        println!("  Stop for backup: {}", service.stop_for_backup);
    }
    Ok(())
}
