//! Backup, verify, list, status and prune commands

use std::time::Instant;

use crate::archive::ArchiveStore;
use crate::backup::{select_archive, BackupKind, BackupOrchestrator, LATEST};
use crate::display::{format_archive_list, format_prune_plan, format_status, StatusLine};
use crate::error::{ManagerError, ManagerResult};
use crate::preflight::Preflight;
use crate::models::{
    validate_archive_name, Operation, OperationKind, OperationResult, ServiceId, Verification,
};
use crate::report::{local_hostname, render_report, Notifier};
use crate::retention::select_to_keep;

use super::CliContext;

/// Run a backup and print its report; returns the process exit code
pub fn handle_backup(
    ctx: &CliContext,
    service: ServiceId,
    kind: BackupKind,
    skip_verify: bool,
) -> ManagerResult<i32> {
    let store = ctx.store();
    let control = ctx.control();
    let preflight = ctx.preflight();
    let notifier = ctx.notifier();

    println!("Backing up {}...", service.display_name());
    let result = BackupOrchestrator::new(&ctx.config, &store, &control, &preflight, ctx.runner())
        .with_notifier(&notifier)
        .run(service, kind, !skip_verify);

    print!("{}", render_report(&result, &local_hostname()));
    Ok(result.exit_code())
}

/// Check that an archive lists cleanly
pub fn handle_verify(ctx: &CliContext, service: ServiceId, selector: &str) -> ManagerResult<i32> {
    if !selector.eq_ignore_ascii_case(LATEST) {
        validate_archive_name(selector)?;
    }
    let store = ctx.store();
    let repo = ctx.config.repository(service);
    let archives = store.list(&repo)?;
    let archive = select_archive(service, &archives, selector)?;

    println!("Verifying {}...", archive.name);
    if store.verify(&repo, &archive.name)? {
        println!("Archive {} verified.", archive.name);
        Ok(0)
    } else {
        println!("Archive {} FAILED verification.", archive.name);
        Ok(1)
    }
}

pub fn handle_list(ctx: &CliContext, service: ServiceId) -> ManagerResult<()> {
    let repo = ctx.config.repository(service);
    let archives = ctx.store().list(&repo)?;

    println!("{} archives in {}", service.display_name(), repo.url());
    println!("{}", format_archive_list(&archives));
    Ok(())
}

/// Archive count and newest archive for every service
///
/// A repository that cannot be listed shows the reason instead of aborting
/// the whole overview.
pub fn handle_status(ctx: &CliContext) -> ManagerResult<()> {
    let store = ctx.store();
    let lines: Vec<StatusLine> = ServiceId::ALL
        .iter()
        .map(|&service| {
            let repo = ctx.config.repository(service);
            let listing = store
                .list(&repo)
                .map(|archives| (archives.len(), archives.into_iter().next()))
                .map_err(|e| e.kind().to_string());
            StatusLine {
                service,
                repository: repo.url(),
                listing,
            }
        })
        .collect();

    println!("{}", format_status(&lines));
    Ok(())
}

/// Show the retention plan; delete only with `force`
///
/// Deleting goes through the same preflight gate as a backup, minus the
/// local space check, and only ever touches archives shown in the plan.
pub fn handle_prune(ctx: &CliContext, service: ServiceId, force: bool) -> ManagerResult<i32> {
    let policy = ctx.config.retention;
    if policy.is_empty() {
        return Err(ManagerError::Validation(
            "Retention policy keeps nothing; refusing to prune".into(),
        ));
    }

    let started = Instant::now();
    if force {
        let gate = ctx
            .preflight()
            .check(ctx.config.service(service), Operation::Prune)
            .into_result();
        if let Err(e) = gate {
            return Ok(record_prune(ctx, service, started, None, Err(e)));
        }
    }

    let store = ctx.store();
    let repo = ctx.config.repository(service);
    let archives = store.list(&repo)?;
    let keep = select_to_keep(&archives, &policy);

    println!(
        "Retention: {} daily, {} weekly, {} monthly",
        policy.daily, policy.weekly, policy.monthly
    );
    println!("{}", format_prune_plan(&archives, &keep));

    if archives.iter().all(|a| keep.contains(&a.name)) {
        println!("Nothing to prune.");
        return Ok(0);
    }
    if !force {
        println!();
        println!("Use --force to delete the archives marked DELETE.");
        return Ok(0);
    }

    let outcome = store.prune_listed(&repo, &archives, &keep);
    Ok(record_prune(ctx, service, started, Some(archives.len()), outcome))
}

/// Journal and print a forced prune; returns the exit code
fn record_prune(
    ctx: &CliContext,
    service: ServiceId,
    started: Instant,
    before: Option<usize>,
    outcome: ManagerResult<Vec<String>>,
) -> i32 {
    let mut result = OperationResult::new(service, OperationKind::Prune);
    result.verification = Verification::NotRun;
    result.counts.archives_before = before;
    match outcome {
        Ok(deleted) => {
            result.success = true;
            result.stage = "DONE".into();
            result.counts.pruned = deleted.len();
            result.counts.archives_after = before.map(|n| n.saturating_sub(deleted.len()));
            println!("Deleted {} archive(s).", deleted.len());
        }
        Err(e) => {
            let stage = if before.is_some() { "PRUNE" } else { "PRECHECK" };
            result.note(format!("failed during {}", stage));
            result.fail(&e);
            result.stage = "FAILED".into();
        }
    }
    result.finish(started.elapsed());
    ctx.journal().deliver(&result);
    print!("{}", render_report(&result, &local_hostname()));
    result.exit_code()
}
