//! External command execution
//!
//! Every external tool (archive engine, container runtime, service restore
//! helpers, notification command) is started through a [`CommandRunner`]
//! from an argument vector. Nothing goes through a shell.

mod runner;

pub use runner::{stderr_tail, CommandOutput, CommandRunner, CommandSpec, SystemRunner};
