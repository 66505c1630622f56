//! Stop, start and health-check a managed service
//!
//! Every method reports success as a plain `bool`; the orchestrators decide
//! what a failure means for their run. The container runtime's exit code is
//! the only success signal.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CommandTimeouts;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::ManagedService;

/// Lifecycle operations on a managed service
pub trait ServiceControl {
    /// Whether any part of the service reports as running
    fn is_running(&self, service: &ManagedService) -> bool;

    /// Stop the service; succeeds trivially when nothing is running
    fn stop(&self, service: &ManagedService) -> bool {
        self.stop_in(service, &service.install_path)
    }

    /// Stop the service using `workdir` as its project directory
    ///
    /// Used when the install directory has already been moved aside.
    fn stop_in(&self, service: &ManagedService, workdir: &Path) -> bool;

    /// Issue the start command
    fn start(&self, service: &ManagedService) -> bool;

    /// Poll the health probe until it passes or the post-start wait elapses
    fn wait_and_verify(&self, service: &ManagedService) -> bool;
}

/// Drives services through configured argument vectors
/// (`docker compose ...` by default)
///
/// `COMPOSE_PROJECT_NAME` is pinned from the service description so the
/// same containers are addressed whatever directory the commands run in.
pub struct ComposeController<'a> {
    runner: &'a dyn CommandRunner,
    timeouts: CommandTimeouts,
}

impl<'a> ComposeController<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeouts: CommandTimeouts) -> Self {
        Self { runner, timeouts }
    }

    fn run_in(
        &self,
        service: &ManagedService,
        argv: &[String],
        workdir: &Path,
        timeout: Duration,
    ) -> Option<CommandOutput> {
        let spec = match CommandSpec::from_argv(argv, timeout) {
            Ok(spec) => spec
                .current_dir(workdir)
                .env("COMPOSE_PROJECT_NAME", service.project_name.clone()),
            Err(e) => {
                tracing::error!(service = %service.id, error = %e, "invalid lifecycle command");
                return None;
            }
        };
        match self.runner.run(&spec) {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::error!(service = %service.id, command = %spec.display(), error = %e, "lifecycle command failed to run");
                None
            }
        }
    }

    fn running_in(&self, service: &ManagedService, workdir: &Path) -> bool {
        if service.status_command.is_empty() || !workdir.is_dir() {
            return false;
        }
        self.run_in(service, &service.status_command, workdir, self.timeouts.probe)
            .map(|o| o.success() && !o.stdout.trim().is_empty())
            .unwrap_or(false)
    }

    fn probe_healthy(&self, service: &ManagedService) -> bool {
        let Some(output) = self.run_in(
            service,
            &service.health_command,
            &service.install_path,
            self.timeouts.probe,
        ) else {
            return false;
        };
        if !output.success() {
            return false;
        }
        // a status listing only counts when it names something
        service.health_command != service.status_command || !output.stdout.trim().is_empty()
    }
}

impl ServiceControl for ComposeController<'_> {
    fn is_running(&self, service: &ManagedService) -> bool {
        self.running_in(service, &service.install_path)
    }

    fn stop_in(&self, service: &ManagedService, workdir: &Path) -> bool {
        if service.stop_command.is_empty() {
            return true;
        }
        if !workdir.is_dir() {
            tracing::info!(service = %service.id, path = %workdir.display(), "nothing to stop, directory missing");
            return true;
        }
        if !service.status_command.is_empty() && !self.running_in(service, workdir) {
            tracing::info!(service = %service.id, "service not running, nothing to stop");
            return true;
        }

        tracing::info!(service = %service.id, "stopping service");
        match self.run_in(service, &service.stop_command, workdir, self.timeouts.stop) {
            Some(output) if output.success() => true,
            Some(output) => {
                tracing::error!(service = %service.id, code = ?output.code, stderr = %output.stderr_tail(), "stop command failed");
                false
            }
            None => false,
        }
    }

    fn start(&self, service: &ManagedService) -> bool {
        if service.start_command.is_empty() {
            return true;
        }
        if !service.install_path.is_dir() {
            tracing::error!(service = %service.id, path = %service.install_path.display(), "cannot start, install directory missing");
            return false;
        }

        tracing::info!(service = %service.id, "starting service");
        match self.run_in(service, &service.start_command, &service.install_path, self.timeouts.start) {
            Some(output) if output.success() => true,
            Some(output) => {
                tracing::error!(service = %service.id, code = ?output.code, stderr = %output.stderr_tail(), "start command failed");
                false
            }
            None => false,
        }
    }

    fn wait_and_verify(&self, service: &ManagedService) -> bool {
        if service.health_command.is_empty() {
            return true;
        }

        let deadline = Instant::now() + service.post_start_wait;
        let interval = service.health_poll_interval.max(Duration::from_millis(10));
        loop {
            if self.probe_healthy(service) {
                tracing::info!(service = %service.id, "service confirmed healthy");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    service = %service.id,
                    waited_secs = service.post_start_wait.as_secs(),
                    "service did not confirm healthy"
                );
                return false;
            }
            thread::sleep(interval.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManagerConfig, Settings};
    use crate::models::ServiceId;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn proxy_in(dir: &Path) -> (ManagedService, CommandTimeouts) {
        let config = ManagerConfig::from_settings(&Settings::default()).unwrap();
        let mut service = config.service(ServiceId::Proxy).clone();
        service.install_path = dir.to_path_buf();
        service.restore_target = dir.to_path_buf();
        service.project_name = "nginx".into();
        service.post_start_wait = Duration::from_millis(200);
        service.health_poll_interval = Duration::from_millis(20);
        (service, config.archive_tool.timeouts)
    }

    #[test]
    fn test_stop_is_trivial_when_not_running() {
        let temp = TempDir::new().unwrap();
        let (service, timeouts) = proxy_in(temp.path());
        let runner = ScriptedRunner::new();
        runner.push_ok(""); // ps: nothing running
        let control = ComposeController::new(&runner, timeouts);

        assert!(control.stop(&service));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_stop_runs_down_with_pinned_project() {
        let temp = TempDir::new().unwrap();
        let (service, timeouts) = proxy_in(temp.path());
        let runner = ScriptedRunner::new();
        runner.push_ok("app\ndb\n");
        runner.push_ok("");
        let control = ComposeController::new(&runner, timeouts);

        let aside = temp.path().join("aside");
        std::fs::create_dir(&aside).unwrap();
        assert!(control.stop_in(&service, &aside));

        let calls = runner.calls();
        assert_eq!(calls[1].display(), "docker compose down");
        assert_eq!(calls[1].cwd.as_deref(), Some(aside.as_path()));
        assert_eq!(calls[1].env_value("COMPOSE_PROJECT_NAME"), Some("nginx"));
    }

    #[test]
    fn test_stop_missing_directory_succeeds() {
        let temp = TempDir::new().unwrap();
        let (service, timeouts) = proxy_in(&temp.path().join("gone"));
        let runner = ScriptedRunner::new();
        let control = ComposeController::new(&runner, timeouts);
        assert!(control.stop(&service));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_start_failure_is_false() {
        let temp = TempDir::new().unwrap();
        let (service, timeouts) = proxy_in(temp.path());
        let runner = ScriptedRunner::new();
        runner.push_fail(1, "no such image");
        let control = ComposeController::new(&runner, timeouts);
        assert!(!control.start(&service));
    }

    #[test]
    fn test_wait_and_verify_polls_until_healthy() {
        let temp = TempDir::new().unwrap();
        let (service, timeouts) = proxy_in(temp.path());
        let runner = ScriptedRunner::new();
        runner.push_ok("");
        runner.push_ok("proxy\n");
        let control = ComposeController::new(&runner, timeouts);

        assert!(control.wait_and_verify(&service));
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_wait_and_verify_times_out_without_error() {
        let temp = TempDir::new().unwrap();
        let (service, timeouts) = proxy_in(temp.path());
        let runner = ScriptedRunner::with_handler(|_| Ok(CommandOutput::failed(1, "")));
        let control = ComposeController::new(&runner, timeouts);

        let started = Instant::now();
        assert!(!control.wait_and_verify(&service));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(runner.calls().len() >= 2);
    }

    #[test]
    fn test_services_without_commands_are_trivial() {
        let temp = TempDir::new().unwrap();
        let config = ManagerConfig::from_settings(&Settings::default()).unwrap();
        let mut app = config.service(ServiceId::App).clone();
        app.install_path = temp.path().to_path_buf();
        let runner = ScriptedRunner::new();
        let control = ComposeController::new(&runner, config.archive_tool.timeouts);

        assert!(control.stop(&app));
        assert!(control.start(&app));
        assert!(control.wait_and_verify(&app));
        assert!(!control.is_running(&app));
        assert!(runner.calls().is_empty());
    }
}
