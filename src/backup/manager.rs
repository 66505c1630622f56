//! Backup orchestration
//!
//! `PRECHECK -> [STOP] -> ARCHIVE -> VERIFY -> [START] -> PRUNE -> DONE`,
//! with `FAILED` reachable from every stage. Pruning only ever runs after
//! the new archive verified (or verification was explicitly skipped), and
//! it always keeps the archive the run just created.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveStore;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::exec::CommandRunner;
use crate::models::{
    archive_label, ArchiveRepository, ManagedService, Operation, OperationKind, OperationResult,
    ServiceId, Verification,
};
use crate::preflight::Preflight;
use crate::report::Notifier;
use crate::retention::select_to_keep;
use crate::service::{strategy_for, ServiceControl, ServiceStrategy};

/// What part of a service to back up
///
/// Only the mail service distinguishes kinds; its export tool takes the
/// kind as an argument.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    All,
    Config,
    Mail,
    Db,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Config => "config",
            Self::Mail => "mail",
            Self::Db => "db",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "config" => Ok(Self::Config),
            "mail" => Ok(Self::Mail),
            "db" | "database" => Ok(Self::Db),
            other => Err(ManagerError::Validation(format!(
                "Unknown backup kind '{}'; expected all, config, mail or db",
                other
            ))),
        }
    }
}

/// Stages of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Precheck,
    Stop,
    Archive,
    Verify,
    Start,
    Prune,
    Done,
    Failed,
}

impl BackupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precheck => "PRECHECK",
            Self::Stop => "STOP",
            Self::Archive => "ARCHIVE",
            Self::Verify => "VERIFY",
            Self::Start => "START",
            Self::Prune => "PRUNE",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run state shared by the stage functions
struct BackupRun<'r> {
    service: &'r ManagedService,
    repo: ArchiveRepository,
    strategy: Box<dyn ServiceStrategy + 'r>,
    stage: BackupStage,
    stopped: bool,
    result: OperationResult,
}

impl BackupRun<'_> {
    fn enter(&mut self, stage: BackupStage) {
        tracing::debug!(service = %self.service.id, stage = %stage, "entering stage");
        self.stage = stage;
    }
}

/// Drives one backup of one service
pub struct BackupOrchestrator<'a> {
    config: &'a ManagerConfig,
    store: &'a dyn ArchiveStore,
    control: &'a dyn ServiceControl,
    preflight: &'a dyn Preflight,
    runner: &'a dyn CommandRunner,
    notifier: Option<&'a dyn Notifier>,
}

impl<'a> BackupOrchestrator<'a> {
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

    /// Hand every finished result to `notifier`
    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run a backup; never returns an error, only a result
    pub fn run(&self, service: ServiceId, kind: BackupKind, also_verify: bool) -> OperationResult {
        let started = Instant::now();
        let managed = self.config.service(service);
        let mut run = BackupRun {
            service: managed,
            repo: self.config.repository(service),
            strategy: strategy_for(service, self.runner, self.config),
            stage: BackupStage::Precheck,
            stopped: false,
            result: OperationResult::new(service, OperationKind::Backup),
        };

        let span = tracing::info_span!("backup", service = %service, run_id = %run.result.run_id);
        let _guard = span.enter();
        tracing::info!(kind = %kind, verify = also_verify, "backup started");

        let outcome = self.execute(&mut run, kind, also_verify);

        if run.stopped {
            // never leave the service down after a failed run
            if self.control.start(run.service) {
                run.result.note("service restarted after failed backup");
            } else {
                run.result
                    .note("service could not be restarted; start it manually");
            }
        }

        match outcome {
            Ok(()) => {
                run.result.success = true;
                run.stage = BackupStage::Done;
                tracing::info!(archive = ?run.result.archive, "backup finished");
            }
            Err(err) => {
                tracing::error!(stage = %run.stage, error = %err, retryable = err.is_retryable(), "backup failed");
                run.result.note(format!("failed during {}", run.stage));
                run.result.fail(&err);
                run.stage = BackupStage::Failed;
            }
        }

        run.result.stage = run.stage.to_string();
        run.result.finish(started.elapsed());
        if let Some(notifier) = self.notifier {
            notifier.deliver(&run.result);
        }
        run.result
    }

    fn execute(&self, run: &mut BackupRun<'_>, kind: BackupKind, also_verify: bool) -> ManagerResult<()> {
        run.enter(BackupStage::Precheck);
        run.strategy.validate_kind(kind)?;
        self.preflight
            .check(run.service, Operation::Backup)
            .into_result()?;

        if run.service.stop_for_backup && self.control.is_running(run.service) {
            run.enter(BackupStage::Stop);
            if !self.control.stop(run.service) {
                return Err(ManagerError::ServiceControl {
                    service: run.service.id.to_string(),
                    detail: "stop command failed".into(),
                });
            }
            run.stopped = true;
        }

        run.enter(BackupStage::Archive);
        let staged = run.strategy.stage_for_backup(run.service, kind)?;
        let label = archive_label(run.service.id, Local::now().naive_local());
        let mut archive = self
            .store
            .create(&run.repo, &staged.paths, &staged.excludes, &label)?;
        run.result.archive = Some(archive.name.clone());

        run.enter(BackupStage::Verify);
        if also_verify {
            let verified = self.store.verify(&run.repo, &archive.name).map_err(|e| {
                run.result.verification = Verification::Failed;
                e
            })?;
            if !verified {
                run.result.verification = Verification::Failed;
                return Err(ManagerError::CorruptArchive {
                    archive: archive.name.clone(),
                    detail: "listing failed or was empty; pruning skipped".into(),
                });
            }
            archive.verified = true;
            run.result.verification = Verification::Passed;
        } else {
            tracing::warn!(archive = %archive.name, "verification skipped on request");
            run.result.verification = Verification::Skipped;
            run.result.note("verification skipped on request");
        }

        if run.stopped {
            run.enter(BackupStage::Start);
            run.stopped = false;
            if !self.control.start(run.service) {
                return Err(ManagerError::ServiceControl {
                    service: run.service.id.to_string(),
                    detail: "start command failed".into(),
                });
            }
        }

        run.enter(BackupStage::Prune);
        self.prune(run, &archive.name)?;

        if let Some(bundle) = &staged.cleanup {
            if let Err(e) = std::fs::remove_dir_all(bundle) {
                tracing::warn!(path = %bundle.display(), error = %e, "could not remove staged export");
                run.result
                    .note(format!("staged export left at {}", bundle.display()));
            }
        }
        Ok(())
    }

    fn prune(&self, run: &mut BackupRun<'_>, current: &str) -> ManagerResult<()> {
        let policy = &self.config.retention;
        if policy.is_empty() {
            run.result
                .note("retention policy keeps nothing; pruning disabled");
            return Ok(());
        }

        let archives = self.store.list(&run.repo)?;
        let before = archives.len();
        let mut keep = select_to_keep(&archives, policy);
        keep.insert(current.to_string());

        let deleted = self.store.prune_listed(&run.repo, &archives, &keep)?;
        for name in &deleted {
            tracing::info!(archive = %name, "pruned");
        }
        run.result.counts.archives_before = Some(before);
        run.result.counts.pruned = deleted.len();
        run.result.counts.archives_after = Some(before.saturating_sub(deleted.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::exec::CommandOutput;
    use crate::models::{Archive, RetentionPolicy};
    use crate::preflight::PreflightFailure;
    use crate::testing::{
        test_config, FakeControl, FakePreflight, MemoryStore, RecordingNotifier, ScriptedRunner,
    };
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        config: ManagerConfig,
        store: MemoryStore,
        control: FakeControl,
        runner: ScriptedRunner,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        for id in ServiceId::ALL {
            fs::create_dir_all(&config.service(id).install_path).unwrap();
        }
        Fixture {
            config,
            store: MemoryStore::new(),
            control: FakeControl::new(),
            runner: ScriptedRunner::new(),
            _temp: temp,
        }
    }

    impl Fixture {
        fn run(&self, preflight: &FakePreflight, service: ServiceId, kind: BackupKind, verify: bool) -> OperationResult {
            BackupOrchestrator::new(&self.config, &self.store, &self.control, preflight, &self.runner)
                .run(service, kind, verify)
        }
    }

    #[test]
    fn test_preflight_failure_never_creates() {
        let f = fixture();
        let preflight = FakePreflight::failing(vec![PreflightFailure::InsufficientSpace {
            path: PathBuf::from("/var"),
            available: 1,
            required: 2,
        }]);

        let result = f.run(&preflight, ServiceId::Proxy, BackupKind::All, true);
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::Preflight));
        assert_eq!(result.stage, "FAILED");
        assert_eq!(f.store.create_calls.get(), 0);
        assert!(f.control.events().is_empty());
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn test_successful_backup_verifies_and_prunes() {
        let mut f = fixture();
        f.store = MemoryStore::with_archives(&[
            "proxy-20240101_020000",
            "proxy-20240102_020000",
            "proxy-20240103_020000",
        ]);
        let result = f.run(&FakePreflight::passing(), ServiceId::Proxy, BackupKind::All, true);

        assert!(result.success, "{:?}", result.error_detail);
        assert_eq!(result.stage, "DONE");
        assert_eq!(result.verification, Verification::Passed);
        let current = result.archive.clone().unwrap();
        assert!(current.starts_with("proxy-"));
        assert!(f.store.names().contains(&current));
        assert_eq!(result.counts.archives_before, Some(4));
        // default policy: four distinct days all fit in the daily slots
        assert_eq!(result.counts.pruned, 0);
        assert_eq!(
            f.store.created_sources.borrow().clone(),
            vec![f.config.service(ServiceId::Proxy).install_path.clone()]
        );
    }

    #[test]
    fn test_prune_keeps_current_archive_and_applies_policy() {
        let mut f = fixture();
        f.config.retention = RetentionPolicy {
            daily: 1,
            weekly: 0,
            monthly: 0,
        };
        f.store = MemoryStore::with_archives(&["app-20240101_020000"]);

        let result = f.run(&FakePreflight::passing(), ServiceId::App, BackupKind::All, true);
        assert!(result.success);
        assert_eq!(result.counts.pruned, 1);
        assert_eq!(result.counts.archives_after, Some(1));
        assert_eq!(f.store.names(), vec![result.archive.unwrap()]);
    }

    #[test]
    fn test_empty_policy_disables_pruning() {
        let mut f = fixture();
        f.config.retention = RetentionPolicy {
            daily: 0,
            weekly: 0,
            monthly: 0,
        };
        f.store = MemoryStore::with_archives(&["app-20240101_020000"]);

        let result = f.run(&FakePreflight::passing(), ServiceId::App, BackupKind::All, true);
        assert!(result.success);
        assert_eq!(f.store.prune_calls.get(), 0);
        assert_eq!(f.store.names().len(), 2);
    }

    #[test]
    fn test_failed_verification_blocks_pruning() {
        let mut f = fixture();
        f.store = MemoryStore::with_archives(&["proxy-20200101_020000"]);
        f.store.verify_result.set(false);
        let before = f.store.names().len();

        let result = f.run(&FakePreflight::passing(), ServiceId::Proxy, BackupKind::All, true);
        assert!(!result.success);
        assert_eq!(result.verification, Verification::Failed);
        assert_eq!(result.error, Some(ErrorKind::CorruptArchive));
        assert_eq!(f.store.prune_calls.get(), 0);
        assert!(f.store.names().len() >= before);
    }

    #[test]
    fn test_skipped_verification_still_prunes() {
        let f = fixture();
        let result = f.run(&FakePreflight::passing(), ServiceId::App, BackupKind::All, false);
        assert!(result.success);
        assert_eq!(result.verification, Verification::Skipped);
        assert_eq!(f.store.prune_calls.get(), 1);
        assert!(result.notes.iter().any(|n| n.contains("skipped")));
    }

    #[test]
    fn test_partial_kind_rejected_for_proxy() {
        let f = fixture();
        let preflight = FakePreflight::passing();
        let result = f.run(&preflight, ServiceId::Proxy, BackupKind::Db, true);
        assert_eq!(result.error, Some(ErrorKind::Validation));
        assert_eq!(preflight.calls.get(), 0);
        assert_eq!(f.store.create_calls.get(), 0);
    }

    #[test]
    fn test_stopped_service_restarted_after_archive_failure() {
        let mut f = fixture();
        let mut proxy = f.config.service(ServiceId::Proxy).clone();
        proxy.stop_for_backup = true;
        f.config = f.config.clone().with_service(proxy);
        f.store.fail_create.set(true);

        let result = f.run(&FakePreflight::passing(), ServiceId::Proxy, BackupKind::All, true);
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ArchiveCreate));
        let events = f.control.events();
        assert!(events[0].starts_with("stop:"));
        assert_eq!(events.last().map(String::as_str), Some("start"));
    }

    #[test]
    fn test_locked_repository_fails_run_and_restarts_service() {
        let mut f = fixture();
        let mut proxy = f.config.service(ServiceId::Proxy).clone();
        proxy.stop_for_backup = true;
        f.config = f.config.clone().with_service(proxy);
        f.store.lock_create.set(true);
        let notifier = RecordingNotifier::default();

        let result = BackupOrchestrator::new(
            &f.config,
            &f.store,
            &f.control,
            &FakePreflight::passing(),
            &f.runner,
        )
        .with_notifier(&notifier)
        .run(ServiceId::Proxy, BackupKind::All, true);

        assert!(!result.success);
        assert_eq!(result.stage, "FAILED");
        assert_eq!(result.error, Some(ErrorKind::RepositoryLocked));
        assert!(result.notes.iter().any(|n| n.contains("ARCHIVE")));
        assert_eq!(f.store.prune_calls.get(), 0);
        let events = f.control.events();
        assert!(events[0].starts_with("stop:"));
        assert_eq!(events.last().map(String::as_str), Some("start"));

        let delivered = notifier.results.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].error, Some(ErrorKind::RepositoryLocked));
    }

    #[test]
    fn test_lock_during_prune_keeps_new_archive() {
        let mut f = fixture();
        f.config.retention = RetentionPolicy {
            daily: 1,
            weekly: 0,
            monthly: 0,
        };
        f.store = MemoryStore::with_archives(&["app-20240101_020000"]);
        f.store.lock_prune.set(true);
        let notifier = RecordingNotifier::default();

        let result = BackupOrchestrator::new(
            &f.config,
            &f.store,
            &f.control,
            &FakePreflight::passing(),
            &f.runner,
        )
        .with_notifier(&notifier)
        .run(ServiceId::App, BackupKind::All, true);

        assert!(!result.success);
        assert_eq!(result.stage, "FAILED");
        assert_eq!(result.error, Some(ErrorKind::RepositoryLocked));
        assert_eq!(result.verification, Verification::Passed);
        assert!(result.notes.iter().any(|n| n.contains("PRUNE")));
        let names = f.store.names();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&result.archive.clone().unwrap()));
        assert_eq!(notifier.results.borrow().len(), 1);
    }

    #[test]
    fn test_prune_spares_archive_created_after_listing() {
        let mut f = fixture();
        f.config.retention = RetentionPolicy {
            daily: 1,
            weekly: 0,
            monthly: 0,
        };
        f.store = MemoryStore::with_archives(&["app-20240101_020000"]);
        let late = Archive::from_name("app-20990101_020000").unwrap();
        f.store.arrive_before_prune.borrow_mut().push(late.clone());

        let result = f.run(&FakePreflight::passing(), ServiceId::App, BackupKind::All, true);
        assert!(result.success, "{:?}", result.error_detail);
        assert_eq!(result.counts.pruned, 1);
        let names = f.store.names();
        assert!(names.contains(&late.name));
        assert!(names.contains(&result.archive.unwrap()));
        assert!(!names.contains(&"app-20240101_020000".to_string()));
    }

    #[test]
    fn test_stop_start_order_on_success() {
        let mut f = fixture();
        let mut proxy = f.config.service(ServiceId::Proxy).clone();
        proxy.stop_for_backup = true;
        f.config = f.config.clone().with_service(proxy);

        let result = f.run(&FakePreflight::passing(), ServiceId::Proxy, BackupKind::All, true);
        assert!(result.success);
        let events = f.control.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], "start");
    }

    #[test]
    fn test_mail_backup_archives_and_removes_staged_export() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path());
        let mail = config.service(ServiceId::Mail).clone();
        fs::create_dir_all(mail.install_path.join("helper-scripts")).unwrap();
        fs::write(&config.mail_profile.export_tool, "#!/bin/sh\n").unwrap();

        let staging = mail.staging_dir.clone();
        let runner = ScriptedRunner::with_handler(move |_| {
            fs::create_dir_all(staging.join("mailcow-2025-01-02-02-00-00")).unwrap();
            Ok(CommandOutput::ok(""))
        });
        let store = MemoryStore::new();
        let control = FakeControl::new();
        let preflight = FakePreflight::passing();

        let result = BackupOrchestrator::new(&config, &store, &control, &preflight, &runner)
            .run(ServiceId::Mail, BackupKind::All, true);

        assert!(result.success, "{:?}", result.error_detail);
        let bundle = mail.staging_dir.join("mailcow-2025-01-02-02-00-00");
        assert_eq!(store.created_sources.borrow().clone(), vec![bundle.clone()]);
        assert!(!bundle.exists());
    }
}
