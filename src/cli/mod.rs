//! CLI command handlers
//!
//! This module bridges the clap argument parsing in `main.rs` with the
//! orchestrators. [`CliContext`] owns the process-wide collaborators (the
//! resolved configuration, the credential provider and the command runner)
//! and hands out borrowed adapters per command.

pub mod backup;
pub mod maintenance;
pub mod restore;

use crate::archive::BorgStore;
use crate::config::{ManagerConfig, ManagerPaths};
use crate::credential::CredentialProvider;
use crate::exec::SystemRunner;
use crate::preflight::{PreflightChecker, StatvfsProbe};
use crate::report::{local_hostname, CommandNotifier, FanoutNotifier, JournalNotifier, LogNotifier};
use crate::service::ComposeController;

pub use backup::{handle_backup, handle_list, handle_prune, handle_status, handle_verify};
pub use maintenance::{handle_cleanup, handle_config, handle_history};
pub use restore::{handle_restore, handle_snapshots};

/// Everything a command handler needs
pub struct CliContext {
    pub paths: ManagerPaths,
    pub config: ManagerConfig,
    credentials: Box<dyn CredentialProvider>,
    runner: SystemRunner,
}

impl CliContext {
    pub fn new(
        paths: ManagerPaths,
        config: ManagerConfig,
        credentials: Box<dyn CredentialProvider>,
    ) -> Self {
        Self {
            paths,
            config,
            credentials,
            runner: SystemRunner::new(),
        }
    }

    pub fn credentials(&self) -> &dyn CredentialProvider {
        self.credentials.as_ref()
    }

    pub fn store(&self) -> BorgStore<'_> {
        BorgStore::new(
            &self.runner,
            self.credentials.as_ref(),
            self.config.archive_tool.clone(),
        )
    }

    pub fn control(&self) -> ComposeController<'_> {
        ComposeController::new(&self.runner, self.config.archive_tool.timeouts)
    }

    pub fn preflight(&self) -> PreflightChecker<'_> {
        PreflightChecker::new(
            self.credentials.as_ref(),
            self.config.credential_ref.clone(),
            &StatvfsProbe,
            self.config.remote.probe_address(),
            self.config.remote.port,
            self.config.archive_tool.connect_timeout,
        )
    }

    pub fn runner(&self) -> &SystemRunner {
        &self.runner
    }

    pub fn journal(&self) -> JournalNotifier {
        JournalNotifier::new(self.paths.history_file())
    }

    /// History file, log summary and the configured notification command
    pub fn notifier(&self) -> FanoutNotifier<'_> {
        FanoutNotifier::new()
            .with(self.journal())
            .with(LogNotifier)
            .with(CommandNotifier::new(
                &self.runner,
                self.config.notifications.clone(),
                local_hostname(),
                self.config.archive_tool.timeouts,
            ))
    }
}
