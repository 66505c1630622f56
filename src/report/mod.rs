//! Run reporting
//!
//! - `Notifier`: receives one `OperationResult` per run
//! - `JournalNotifier`: append-only JSONL run history
//! - `CommandNotifier`: plain-text report piped to an external command
//! - `LogNotifier` / `FanoutNotifier`: log summary and composition
//! - `format`: report, subject, duration and size rendering

pub mod format;
mod journal;
mod notifier;

pub use crate::models::{OperationKind, OperationResult};
pub use format::{format_duration, format_size, render_report, subject_line};
pub use journal::JournalNotifier;
pub use notifier::{
    local_hostname, CommandNotifier, FanoutNotifier, LogNotifier, Notifier, SUBJECT_PLACEHOLDER,
};
