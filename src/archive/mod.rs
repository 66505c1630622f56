//! Remote archive repository access
//!
//! [`ArchiveStore`] is the seam between the orchestrators and the
//! deduplicating archive engine; [`BorgStore`] drives the `borg` CLI over SSH.

mod borg;
mod store;

pub use crate::models::{Archive, ArchiveRepository};
pub use borg::{classify_failure, BorgStore};
pub use store::{count_files, ArchiveStore};
