//! Backup and restore orchestration
//!
//! # Architecture
//!
//! - `BackupOrchestrator`: stage, archive, verify and prune one service
//! - `RestoreOrchestrator`: snapshot, extract and bring one service back
//! - `SafetySnapshot`: the moved-aside installation a restore leaves behind
//!
//! Both orchestrators take their collaborators (archive store, service
//! control, preflight, command runner) by reference and never return an
//! error: every run ends in an `OperationResult`.
//!
//! # Example
//!
//! ```rust,ignore
//! use server_manager::backup::{BackupKind, BackupOrchestrator};
//!
//! let result = BackupOrchestrator::new(&config, &store, &control, &preflight, &runner)
//!     .run(ServiceId::Proxy, BackupKind::All, true);
//! std::process::exit(result.exit_code());
//! ```

mod manager;
mod restore;
mod snapshot;

pub use manager::{BackupKind, BackupOrchestrator, BackupStage};
pub use restore::{select_archive, RestoreOrchestrator, RestoreStage, LATEST};
pub use snapshot::{list_snapshots, SafetySnapshot};
