//! Restore and safety-snapshot commands

use crate::archive::ArchiveStore;
use crate::backup::{list_snapshots, select_archive, RestoreOrchestrator, LATEST};
use crate::display::format_snapshots;
use crate::error::ManagerResult;
use crate::maintenance::tree_size;
use crate::models::{validate_archive_name, ServiceId};
use crate::report::{local_hostname, render_report};

use super::CliContext;

/// Restore a service
///
/// Without `force` only the plan is printed: which archive, which target,
/// and where the current installation will be kept.
pub fn handle_restore(
    ctx: &CliContext,
    service: ServiceId,
    selector: &str,
    force: bool,
) -> ManagerResult<i32> {
    let managed = ctx.config.service(service);

    if !force {
        if !selector.eq_ignore_ascii_case(LATEST) {
            validate_archive_name(selector)?;
        }
        let repo = ctx.config.repository(service);
        let archives = ctx.store().list(&repo)?;
        let archive = select_archive(service, &archives, selector)?;

        println!("Restore plan for {}", service.display_name());
        println!("  Archive:  {}", archive.name);
        println!("  Target:   {}", managed.restore_target.display());
        let install = &managed.install_path;
        let action = if managed.restores_install_dir() { "moved" } else { "copied" };
        if install.exists() {
            println!(
                "  Current installation will be {} to {}.pre-restore.<timestamp>",
                action,
                install.display()
            );
        } else {
            println!("  {} does not exist yet; nothing to snapshot", install.display());
        }
        println!("  The service will be stopped for the duration of the restore.");
        println!();
        println!("Use --force to proceed.");
        return Ok(0);
    }

    let store = ctx.store();
    let control = ctx.control();
    let preflight = ctx.preflight();
    let notifier = ctx.notifier();

    println!("Restoring {} from {}...", service.display_name(), selector);
    let result = RestoreOrchestrator::new(&ctx.config, &store, &control, &preflight, ctx.runner())
        .with_notifier(&notifier)
        .run(service, selector);

    print!("{}", render_report(&result, &local_hostname()));
    Ok(result.exit_code())
}

/// List safety snapshots left by earlier restores
pub fn handle_snapshots(ctx: &CliContext, service: ServiceId) -> ManagerResult<()> {
    let target = &ctx.config.service(service).install_path;
    let snapshots = list_snapshots(target)?;

    println!("Safety snapshots of {}", target.display());
    let sized: Vec<_> = snapshots
        .into_iter()
        .map(|s| {
            let size = tree_size(&s.path);
            (s, size)
        })
        .collect();
    println!("{}", format_snapshots(&sized));
    if !sized.is_empty() {
        println!();
        println!("Snapshots are never removed automatically; delete them once no longer needed.");
    }
    Ok(())
}
