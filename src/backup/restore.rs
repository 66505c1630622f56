//! Restore orchestration
//!
//! `SELECT -> PRECHECK -> SNAPSHOT -> STOP -> EXTRACT -> FIXUP -> START ->
//! VERIFY -> DONE`, with `FAILED` absorbing.
//!
//! The previous installation is moved aside (copied, for the mail service,
//! whose restore tool rewrites it in place) before anything destructive
//! happens and is never deleted here. Extraction goes into a scratch
//! directory next to the target; only a complete payload is renamed into
//! place, so a failed extraction never leaves a half-written target.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;

use super::snapshot::SafetySnapshot;
use crate::archive::ArchiveStore;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::exec::CommandRunner;
use crate::models::{
    validate_archive_name, Archive, ArchiveRepository, ManagedService, Operation, OperationKind,
    OperationResult, ServiceId, ARCHIVE_TIMESTAMP_FORMAT,
};
use crate::preflight::Preflight;
use crate::report::Notifier;
use crate::service::{strategy_for, ServiceControl, ServiceStrategy};

/// Selector meaning "the newest archive"
pub const LATEST: &str = "latest";

/// Stages of a restore run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Select,
    Precheck,
    Snapshot,
    Stop,
    Extract,
    Fixup,
    Start,
    Verify,
    Done,
    Failed,
}

impl RestoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Precheck => "PRECHECK",
            Self::Snapshot => "SNAPSHOT",
            Self::Stop => "STOP",
            Self::Extract => "EXTRACT",
            Self::Fixup => "FIXUP",
            Self::Start => "START",
            Self::Verify => "VERIFY",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve `selector` (`latest` or an exact archive name) against a listing
pub fn select_archive(
    service: ServiceId,
    archives: &[Archive],
    selector: &str,
) -> ManagerResult<Archive> {
    if archives.is_empty() {
        return Err(ManagerError::NoBackupsFound {
            service: service.to_string(),
        });
    }

    if selector.eq_ignore_ascii_case(LATEST) {
        return archives
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned()
            .ok_or_else(|| ManagerError::NoBackupsFound {
                service: service.to_string(),
            });
    }

    archives
        .iter()
        .find(|a| a.name == selector)
        .cloned()
        .ok_or_else(|| ManagerError::archive_not_found(selector))
}

struct RestoreRun<'r> {
    service: &'r ManagedService,
    repo: ArchiveRepository,
    strategy: Box<dyn ServiceStrategy + 'r>,
    stage: RestoreStage,
    result: OperationResult,
}

impl RestoreRun<'_> {
    fn enter(&mut self, stage: RestoreStage) {
        tracing::debug!(service = %self.service.id, stage = %stage, "entering stage");
        self.stage = stage;
    }
}

/// Drives one restore of one service
pub struct RestoreOrchestrator<'a> {
    config: &'a ManagerConfig,
    store: &'a dyn ArchiveStore,
    control: &'a dyn ServiceControl,
    preflight: &'a dyn Preflight,
    runner: &'a dyn CommandRunner,
    notifier: Option<&'a dyn Notifier>,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(
        config: &'a ManagerConfig,
        store: &'a dyn ArchiveStore,
        control: &'a dyn ServiceControl,
        preflight: &'a dyn Preflight,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            store,
            control,
            preflight,
            runner,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Restore `service` from the archive picked by `selector`
    pub fn run(&self, service: ServiceId, selector: &str) -> OperationResult {
        let started = Instant::now();
        let mut run = RestoreRun {
            service: self.config.service(service),
            repo: self.config.repository(service),
            strategy: strategy_for(service, self.runner, self.config),
            stage: RestoreStage::Select,
            result: OperationResult::new(service, OperationKind::Restore),
        };

        let span = tracing::info_span!("restore", service = %service, run_id = %run.result.run_id);
        let _guard = span.enter();
        tracing::info!(selector = selector, target = %run.service.restore_target.display(), "restore started");

        match self.execute(&mut run, selector) {
            Ok(true) => {
                run.result.success = true;
                run.stage = RestoreStage::Done;
                tracing::info!(archive = ?run.result.archive, "restore finished");
            }
            Ok(false) => {
                // mechanics completed; health is reported, not rolled back
                let timeout = ManagerError::ServiceHealthTimeout {
                    service: service.to_string(),
                    waited_secs: run.service.post_start_wait.as_secs(),
                };
                tracing::warn!(error = %timeout, "restore finished unhealthy");
                run.result.fail(&timeout);
                run.stage = RestoreStage::Done;
            }
            Err(err) => {
                tracing::error!(stage = %run.stage, error = %err, retryable = err.is_retryable(), "restore failed");
                run.result.note(format!("failed during {}", run.stage));
                if let Some(snapshot) = &run.result.snapshot {
                    run.result.note(format!(
                        "previous installation preserved at {}",
                        snapshot.display()
                    ));
                }
                run.result.fail(&err);
                run.stage = RestoreStage::Failed;
            }
        }

        run.result.stage = run.stage.to_string();
        run.result.finish(started.elapsed());
        if let Some(notifier) = self.notifier {
            notifier.deliver(&run.result);
        }
        run.result
    }

    /// Returns whether the service confirmed healthy
    fn execute(&self, run: &mut RestoreRun<'_>, selector: &str) -> ManagerResult<bool> {
        run.enter(RestoreStage::Select);
        if !selector.eq_ignore_ascii_case(LATEST) {
            validate_archive_name(selector)?;
        }
        let archives = self.store.list(&run.repo)?;
        run.result.counts.archives_before = Some(archives.len());
        let archive = select_archive(run.service.id, &archives, selector)?;
        tracing::info!(archive = %archive.name, "archive selected");
        run.result.archive = Some(archive.name.clone());

        run.enter(RestoreStage::Precheck);
        self.preflight
            .check(run.service, Operation::Restore)
            .into_result()?;

        run.enter(RestoreStage::Snapshot);
        let taken_at = Local::now().naive_local();
        let snapshot = if run.service.restores_install_dir() {
            SafetySnapshot::take(&run.service.restore_target, taken_at)?
        } else {
            // the restore tool rewrites the live installation in place
            let snapshot = SafetySnapshot::copy(&run.service.install_path, taken_at)?;
            if discard_staged_bundle(&run.service.restore_target)? {
                run.result.note(format!(
                    "removed leftover staged bundle at {}",
                    run.service.restore_target.display()
                ));
            }
            snapshot
        };
        match &snapshot {
            Some(s) => run.result.snapshot = Some(s.path.clone()),
            None => run.result.note(format!(
                "nothing at {} to snapshot",
                run.service.install_path.display()
            )),
        }

        run.enter(RestoreStage::Stop);
        let workdir = match &snapshot {
            Some(s) if run.service.restores_install_dir() => s.path.clone(),
            _ => run.service.install_path.clone(),
        };
        if !self.control.stop_in(run.service, &workdir) {
            return Err(ManagerError::ServiceControl {
                service: run.service.id.to_string(),
                detail: "stop command failed".into(),
            });
        }

        run.enter(RestoreStage::Extract);
        let files = self.extract_into_place(run, &archive.name)?;
        run.result.counts.files_restored = Some(files);

        run.enter(RestoreStage::Fixup);
        if let Err(e) = run.strategy.fixup_after_restore(run.service) {
            run.result
                .note("service left stopped after failed fixup");
            return Err(e);
        }
        if !run.service.restores_install_dir() {
            if let Err(e) = discard_staged_bundle(&run.service.restore_target) {
                tracing::warn!(error = %e, "could not remove replayed bundle");
                run.result.note(format!(
                    "replayed bundle left at {}",
                    run.service.restore_target.display()
                ));
            }
        }

        run.enter(RestoreStage::Start);
        if !self.control.start(run.service) {
            return Err(ManagerError::ServiceControl {
                service: run.service.id.to_string(),
                detail: "start command failed".into(),
            });
        }

        run.enter(RestoreStage::Verify);
        Ok(self.control.wait_and_verify(run.service))
    }

    /// Extract into a scratch sibling of the target, then rename the
    /// payload into place
    fn extract_into_place(&self, run: &RestoreRun<'_>, archive: &str) -> ManagerResult<u64> {
        let target = &run.service.restore_target;
        let scratch = scratch_dir(target)?;
        fs::create_dir_all(&scratch).map_err(|e| {
            ManagerError::Io(format!("Failed to create {}: {}", scratch.display(), e))
        })?;
        tracing::debug!(scratch = %scratch.display(), "extracting");

        let outcome = self.store.extract(&run.repo, archive, &scratch).and_then(|files| {
            let payload = run.strategy.locate_payload(run.service, archive, &scratch)?;
            if fs::symlink_metadata(target).is_ok() {
                return Err(ManagerError::Io(format!(
                    "{} reappeared during restore; refusing to overwrite",
                    target.display()
                )));
            }
            fs::rename(&payload, target).map_err(|e| {
                ManagerError::Io(format!(
                    "Failed to move {} into {}: {}",
                    payload.display(),
                    target.display(),
                    e
                ))
            })?;
            Ok(files)
        });

        if let Err(e) = fs::remove_dir_all(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "could not remove extraction scratch");
        }
        outcome
    }
}

/// Remove a staged bundle directory; it is a copy of an archive that is
/// still in the repository. Returns whether anything was there.
fn discard_staged_bundle(path: &Path) -> ManagerResult<bool> {
    match fs::symlink_metadata(path) {
        Err(_) => Ok(false),
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| {
                ManagerError::Io(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            tracing::debug!(path = %path.display(), "staged bundle removed");
            Ok(true)
        }
        Ok(_) => Err(ManagerError::Validation(format!(
            "Staged restore path is not a directory: {}",
            path.display()
        ))),
    }
}

/// `<parent>/.<name>.restore-<timestamp>`, next to the target so the final
/// rename never crosses filesystems
fn scratch_dir(target: &Path) -> ManagerResult<PathBuf> {
    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Err(ManagerError::Validation(format!(
            "Restore target has no parent directory: {}",
            target.display()
        )));
    };
    let stamp = Local::now().naive_local().format(ARCHIVE_TIMESTAMP_FORMAT);
    let mut scratch = parent.join(format!(".{}.restore-{}", name.to_string_lossy(), stamp));
    let mut attempt = 1;
    while scratch.exists() {
        scratch = parent.join(format!(
            ".{}.restore-{}-{}",
            name.to_string_lossy(),
            stamp,
            attempt
        ));
        attempt += 1;
    }
    Ok(scratch)
}
