//! Argument-vector command runner with timeouts and captured output

use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::credential::SecureString;
use crate::error::{ManagerError, ManagerResult};

/// Bytes of stderr kept for error details
const STDERR_TAIL_BYTES: usize = 2048;

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A fully described external command
///
/// `secret_env` values reach only the child's environment; they are never
/// part of [`CommandSpec::display`] or the `Debug` output.
#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub secret_env: Vec<(String, SecureString)>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            secret_env: Vec::new(),
            cwd: None,
            stdin: None,
            timeout,
        }
    }

    /// Build a spec from a configured argument vector (`[program, args...]`)
    pub fn from_argv(argv: &[String], timeout: Duration) -> ManagerResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ManagerError::Config("Command cannot be empty".into()))?;
        Ok(Self::new(program.clone(), timeout).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: SecureString) -> Self {
        self.secret_env.push((key.into(), value));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Value of a plain environment entry
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret_keys: Vec<&str> = self.secret_env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("secret_env", &secret_keys)
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the child was ended by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// A successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The last part of stderr, for error details
    pub fn stderr_tail(&self) -> String {
        stderr_tail(&self.stderr)
    }

    /// Convert a non-zero exit into `ManagerError::Command`
    pub fn check(self, program: &str) -> ManagerResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ManagerError::Command {
                program: program.to_string(),
                code: self.code,
                stderr_tail: self.stderr_tail(),
            })
        }
    }
}

/// Last `STDERR_TAIL_BYTES` of a captured stream, cut on a char boundary
pub fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// Runs external commands
///
/// Returns `Ok` for any command that ran to completion, whatever its exit
/// code; `Err` only when the command could not be started or exceeded its
/// timeout.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> ManagerResult<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> ManagerResult<CommandOutput> {
        (**self).run(spec)
    }
}

/// Runs commands as child processes of this one
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn(&self, spec: &CommandSpec) -> ManagerResult<Child> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        for (key, value) in &spec.secret_env {
            cmd.env(key, value.as_str());
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ManagerError::Command {
                    program: spec.program.clone(),
                    code: None,
                    stderr_tail: "program not found".into(),
                }
            } else {
                ManagerError::Io(format!("Failed to start {}: {}", spec.program, e))
            }
        })
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> ManagerResult<CommandOutput> {
        tracing::debug!(command = %spec.display(), timeout_secs = spec.timeout.as_secs(), "running command");
        let start = Instant::now();
        let mut child = self.spawn(spec)?;

        if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
            thread::spawn(move || {
                let _ = pipe.write_all(&input);
            });
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if start.elapsed() >= spec.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        command = %spec.program,
                        timeout_secs = spec.timeout.as_secs(),
                        "command timed out and was killed"
                    );
                    return Err(ManagerError::Timeout {
                        program: spec.program.clone(),
                        secs: spec.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(ManagerError::Io(format!(
                        "Failed to wait for {}: {}",
                        spec.program, e
                    )))
                }
            }
        };

        let output = CommandOutput {
            code: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            duration: start.elapsed(),
        };
        tracing::debug!(
            command = %spec.program,
            code = ?output.code,
            duration_ms = output.duration.as_millis() as u64,
            "command finished"
        );
        Ok(output)
    }
}
