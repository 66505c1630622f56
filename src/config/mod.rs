//! Configuration module for server-manager
//!
//! This module provides configuration management including:
//! - Home and settings file path resolution
//! - The YAML settings file model
//! - The resolved, immutable per-run configuration

pub mod paths;
pub mod resolved;
pub mod settings;

pub use paths::ManagerPaths;
pub use resolved::{ArchiveToolConfig, CommandTimeouts, MailProfile, ManagerConfig};
pub use settings::Settings;
