//! Delivery of run reports
//!
//! A notifier receives exactly one `OperationResult` per run. Delivery
//! problems are logged and never change the outcome of the run.

use std::ffi::CStr;

use crate::config::settings::NotificationSettings;
use crate::config::CommandTimeouts;
use crate::error::{ManagerError, ManagerResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::models::OperationResult;

use super::format::{render_report, subject_line};

/// Placeholder replaced by the subject line in a notification command
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Receives the report of every finished run
pub trait Notifier {
    fn notify(&self, result: &OperationResult) -> ManagerResult<()>;

    /// Notify, logging instead of returning any failure
    fn deliver(&self, result: &OperationResult) {
        if let Err(e) = self.notify(result) {
            tracing::warn!(run_id = %result.run_id, error = %e, "notification failed");
        }
    }
}

/// Writes a one-line summary to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, result: &OperationResult) -> ManagerResult<()> {
        if result.success {
            tracing::info!(
                service = %result.service,
                kind = %result.kind,
                archive = ?result.archive,
                duration_ms = result.duration_ms,
                "run succeeded"
            );
        } else {
            tracing::warn!(
                service = %result.service,
                kind = %result.kind,
                stage = %result.stage,
                error = ?result.error,
                "run failed"
            );
        }
        Ok(())
    }
}

/// Pipes a plain-text report into an external command (a mailer, a chat
/// webhook wrapper, ...)
pub struct CommandNotifier<'a> {
    runner: &'a dyn CommandRunner,
    settings: NotificationSettings,
    host: String,
    timeout: std::time::Duration,
}

impl<'a> CommandNotifier<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        settings: NotificationSettings,
        host: impl Into<String>,
        timeouts: CommandTimeouts,
    ) -> Self {
        Self {
            runner,
            settings,
            host: host.into(),
            timeout: timeouts.probe,
        }
    }

    fn wanted(&self, result: &OperationResult) -> bool {
        if self.settings.command.is_empty() {
            return false;
        }
        if result.success {
            self.settings.notify_on_success
        } else {
            self.settings.notify_on_failure
        }
    }
}

impl Notifier for CommandNotifier<'_> {
    fn notify(&self, result: &OperationResult) -> ManagerResult<()> {
        if !self.wanted(result) {
            return Ok(());
        }

        let subject = subject_line(result, &self.host);
        let argv: Vec<String> = self
            .settings
            .command
            .iter()
            .map(|a| a.replace(SUBJECT_PLACEHOLDER, &subject))
            .collect();
        let spec = CommandSpec::from_argv(&argv, self.timeout)?
            .stdin(render_report(result, &self.host));

        let program = spec.program.clone();
        self.runner.run(&spec)?.check(&program)?;
        tracing::debug!(subject = %subject, "notification sent");
        Ok(())
    }
}

/// Hands each result to several notifiers; one failing does not stop the rest
#[derive(Default)]
pub struct FanoutNotifier<'a> {
    notifiers: Vec<Box<dyn Notifier + 'a>>,
}

impl<'a> FanoutNotifier<'a> {
    pub fn new() -> Self {
        Self {
            notifiers: Vec::new(),
        }
    }

    pub fn with(mut self, notifier: impl Notifier + 'a) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for FanoutNotifier<'_> {
    fn notify(&self, result: &OperationResult) -> ManagerResult<()> {
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(result) {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Io(format!(
                "{} notifier(s) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

/// Name of this machine, for report subjects
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is writable for its full length and gethostname writes at
    // most that many bytes
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len() - 1);
    CStr::from_bytes_with_nul(&buf[..=end])
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
