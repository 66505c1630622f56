//! Read-only checks gating every mutating operation
//!
//! Preflight never changes anything on disk or on the remote; it reports
//! every failed condition at once so the operator can fix them in one go.

mod checker;
mod disk;

pub use checker::{Preflight, PreflightChecker, PreflightFailure, PreflightResult};
pub use disk::{available_bytes, SpaceProbe, StatvfsProbe};
