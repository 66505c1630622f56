//! server-manager - backup, verification, retention pruning and restore for
//! a small set of self-hosted services
//!
//! Three services are managed: the reverse-proxy admin tool (nginx Proxy
//! Manager), the mail server (Mailcow) and this management application
//! itself. Archives live in remote, encrypted, deduplicating `borg`
//! repositories reached over SSH.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: path resolution, the settings file and the resolved per-run
//!   configuration
//! - `error`: custom error types and the serializable error taxonomy
//! - `models`: services, repositories, archives, retention policy, run results
//! - `exec`: argument-vector command execution with timeouts
//! - `credential`: the repository passphrase, kept in memory only
//! - `archive`: the archive store contract and its `borg` adapter
//! - `retention`: which archives a policy keeps
//! - `service`: stop/start/health control and per-service strategies
//! - `preflight`: read-only checks gating every mutating operation
//! - `backup`: the backup and restore orchestrators, safety snapshots
//! - `report`: notifiers, run history and report formatting
//! - `maintenance`: staging cleanup
//! - `cli` / `display`: command handlers and terminal tables
//!
//! # Example
//!
//! ```rust,ignore
//! use server_manager::config::{ManagerPaths, Settings};
//!
//! let paths = ManagerPaths::new();
//! let config = Settings::load(&paths.settings_file())?.resolve()?;
//! ```

pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod credential;
pub mod display;
pub mod error;
pub mod exec;
pub mod maintenance;
pub mod models;
pub mod preflight;
pub mod report;
pub mod retention;
pub mod service;

#[cfg(test)]
mod testing;

pub use error::{ManagerError, ManagerResult};
