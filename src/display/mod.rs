//! Display formatting for terminal output
//!
//! Tables for archive listings, prune plans, the status overview, run
//! history and safety snapshots.

pub mod archive;
pub mod history;

pub use archive::{format_archive_list, format_prune_plan, format_status, StatusLine};
pub use history::{format_history, format_snapshots};
