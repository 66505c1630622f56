//! In-memory fakes shared by unit tests

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::archive::ArchiveStore;
use crate::config::{ManagerConfig, Settings};
use crate::error::{ManagerError, ManagerResult};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::{Archive, ArchiveRepository, ManagedService, Operation, OperationResult};
use crate::preflight::{Preflight, PreflightFailure, PreflightResult};
use crate::report::Notifier;
use crate::service::ServiceControl;

/// Configuration with every local path below `root`
///
/// Install directories are `root/nginx`, `root/mailcow` and `root/app`;
/// staging lives in `root/staging`. Health waits are short.
pub fn test_config(root: &Path) -> ManagerConfig {
    let mut settings = Settings::default();
    settings.remote.host = String::new();
    settings.backup.local_staging = root.join("staging");
    settings.services.proxy.install_path = Some(root.join("nginx"));
    settings.services.mail.install_path = Some(root.join("mailcow"));
    settings.services.app.install_path = Some(root.join("app"));
    for service in [
        &mut settings.services.proxy,
        &mut settings.services.mail,
        &mut settings.services.app,
    ] {
        service.post_start_wait_secs = Some(0);
        service.owner = Some(String::new());
    }
    ManagerConfig::from_settings(&settings).expect("test settings resolve")
}

type Handler = Box<dyn Fn(&CommandSpec) -> ManagerResult<CommandOutput>>;

/// Replays queued outputs, then falls back to a handler (or empty success)
pub struct ScriptedRunner {
    responses: RefCell<VecDeque<ManagerResult<CommandOutput>>>,
    handler: Option<Handler>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            responses: RefCell::new(VecDeque::new()),
            handler: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> ManagerResult<CommandOutput> + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    pub fn push_ok(&self, stdout: &str) {
        self.responses
            .borrow_mut()
            .push_back(Ok(CommandOutput::ok(stdout)));
    }

    pub fn push_fail(&self, code: i32, stderr: &str) {
        self.responses
            .borrow_mut()
            .push_back(Ok(CommandOutput::failed(code, stderr)));
    }

    pub fn push_err(&self, err: ManagerError) {
        self.responses.borrow_mut().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Command lines of every call, for order assertions
    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.display()).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> ManagerResult<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        if let Some(response) = self.responses.borrow_mut().pop_front() {
            return response;
        }
        match &self.handler {
            Some(handler) => handler(spec),
            None => Ok(CommandOutput::ok("")),
        }
    }
}

/// Archive repository kept in memory
///
/// `extract_files` are written (relative paths, created below the
/// destination) on every successful extraction.
pub struct MemoryStore {
    pub archives: RefCell<Vec<Archive>>,
    pub create_calls: Cell<usize>,
    pub extract_calls: Cell<usize>,
    pub prune_calls: Cell<usize>,
    pub verify_result: Cell<bool>,
    pub fail_create: Cell<bool>,
    pub fail_extract: Cell<bool>,
    /// Answer create with a repository lock error
    pub lock_create: Cell<bool>,
    /// Answer prune with a repository lock error
    pub lock_prune: Cell<bool>,
    /// Archives that show up after the next listing, before pruning
    pub arrive_before_prune: RefCell<Vec<Archive>>,
    pub extract_files: RefCell<Vec<PathBuf>>,
    pub created_sources: RefCell<Vec<PathBuf>>,
    pub created_at: Cell<Option<NaiveDateTime>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            archives: RefCell::new(Vec::new()),
            create_calls: Cell::new(0),
            extract_calls: Cell::new(0),
            prune_calls: Cell::new(0),
            verify_result: Cell::new(true),
            fail_create: Cell::new(false),
            fail_extract: Cell::new(false),
            lock_create: Cell::new(false),
            lock_prune: Cell::new(false),
            arrive_before_prune: RefCell::new(Vec::new()),
            extract_files: RefCell::new(Vec::new()),
            created_sources: RefCell::new(Vec::new()),
            created_at: Cell::new(None),
        }
    }

    pub fn with_archives(names: &[&str]) -> Self {
        let store = Self::new();
        for name in names {
            if let Some(archive) = Archive::from_name(name) {
                store.archives.borrow_mut().push(archive);
            }
        }
        store
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.archives.borrow().iter().map(|a| a.name.clone()).collect();
        names.sort();
        names
    }
}

impl ArchiveStore for MemoryStore {
    fn create(
        &self,
        repo: &ArchiveRepository,
        sources: &[PathBuf],
        _excludes: &[String],
        label: &str,
    ) -> ManagerResult<Archive> {
        self.create_calls.set(self.create_calls.get() + 1);
        if self.lock_create.get() {
            return Err(ManagerError::RepositoryLocked {
                repository: repo.url(),
            });
        }
        if self.fail_create.get() {
            return Err(ManagerError::ArchiveCreate {
                archive: label.to_string(),
                stderr_tail: "simulated failure".into(),
            });
        }
        self.created_sources.borrow_mut().extend(sources.iter().cloned());
        let archive = match self.created_at.get() {
            Some(at) => Archive::new(label, at),
            None => Archive::from_name(label)
                .ok_or_else(|| ManagerError::Validation(format!("bad label {}", label)))?,
        };
        self.archives.borrow_mut().push(archive.clone());
        Ok(archive)
    }

    fn list(&self, _repo: &ArchiveRepository) -> ManagerResult<Vec<Archive>> {
        let mut archives = self.archives.borrow().clone();
        archives.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(archives)
    }

    fn verify(&self, _repo: &ArchiveRepository, archive: &str) -> ManagerResult<bool> {
        let exists = self.archives.borrow().iter().any(|a| a.name == archive);
        Ok(exists && self.verify_result.get())
    }

    fn extract(
        &self,
        _repo: &ArchiveRepository,
        archive: &str,
        destination: &Path,
    ) -> ManagerResult<u64> {
        self.extract_calls.set(self.extract_calls.get() + 1);
        if self.fail_extract.get() {
            std::fs::write(destination.join("partial"), "half")?;
            return Err(ManagerError::CorruptArchive {
                archive: archive.to_string(),
                detail: "simulated failure".into(),
            });
        }
        let files = self.extract_files.borrow();
        for rel in files.iter() {
            let path = destination.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, archive)?;
        }
        Ok(files.len() as u64)
    }

    fn prune_listed(
        &self,
        repo: &ArchiveRepository,
        listed: &[Archive],
        keep: &BTreeSet<String>,
    ) -> ManagerResult<Vec<String>> {
        self.prune_calls.set(self.prune_calls.get() + 1);
        let mut archives = self.archives.borrow_mut();
        archives.extend(self.arrive_before_prune.borrow_mut().drain(..));
        if self.lock_prune.get() {
            return Err(ManagerError::RepositoryLocked {
                repository: repo.url(),
            });
        }
        let doomed: BTreeSet<&str> = listed
            .iter()
            .map(|a| a.name.as_str())
            .filter(|name| !keep.contains(*name))
            .collect();
        let deleted: Vec<String> = archives
            .iter()
            .filter(|a| doomed.contains(a.name.as_str()))
            .map(|a| a.name.clone())
            .collect();
        archives.retain(|a| !doomed.contains(a.name.as_str()));
        Ok(deleted)
    }
}

/// Service controller recording every call
pub struct FakeControl {
    pub running: Cell<bool>,
    pub healthy: Cell<bool>,
    pub start_ok: Cell<bool>,
    pub events: RefCell<Vec<String>>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self {
            running: Cell::new(true),
            healthy: Cell::new(true),
            start_ok: Cell::new(true),
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl ServiceControl for FakeControl {
    fn is_running(&self, _service: &ManagedService) -> bool {
        self.running.get()
    }

    fn stop_in(&self, _service: &ManagedService, workdir: &Path) -> bool {
        self.events
            .borrow_mut()
            .push(format!("stop:{}", workdir.display()));
        self.running.set(false);
        true
    }

    fn start(&self, _service: &ManagedService) -> bool {
        self.events.borrow_mut().push("start".into());
        if self.start_ok.get() {
            self.running.set(true);
        }
        self.start_ok.get()
    }

    fn wait_and_verify(&self, _service: &ManagedService) -> bool {
        self.events.borrow_mut().push("verify".into());
        self.healthy.get()
    }
}

/// Preflight returning a fixed set of failures
pub struct FakePreflight {
    pub failures: Vec<PreflightFailure>,
    pub calls: Cell<usize>,
}

impl FakePreflight {
    pub fn passing() -> Self {
        Self {
            failures: Vec::new(),
            calls: Cell::new(0),
        }
    }

    pub fn failing(failures: Vec<PreflightFailure>) -> Self {
        Self {
            failures,
            calls: Cell::new(0),
        }
    }
}

impl Preflight for FakePreflight {
    fn check(&self, _service: &ManagedService, _operation: Operation) -> PreflightResult {
        self.calls.set(self.calls.get() + 1);
        PreflightResult {
            failures: self.failures.clone(),
        }
    }
}

/// Notifier keeping every result it receives
#[derive(Default)]
pub struct RecordingNotifier {
    pub results: RefCell<Vec<OperationResult>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, result: &OperationResult) -> ManagerResult<()> {
        self.results.borrow_mut().push(result.clone());
        Ok(())
    }
}
