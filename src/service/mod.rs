//! Managed service lifecycle and per-service behaviour
//!
//! - [`ServiceControl`]: stop/start/health around backup and restore windows
//! - [`ServiceStrategy`]: what each service archives and how it is fixed up
//!   after a restore

mod lifecycle;
mod strategy;

pub use crate::models::{ManagedService, ServiceId};
pub use lifecycle::{ComposeController, ServiceControl};
pub use strategy::{
    strategy_for, AppStrategy, MailStrategy, ProxyStrategy, ServiceStrategy, StagedSource,
};
