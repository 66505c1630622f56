//! Core data models for server-manager
//!
//! This module contains the data structures shared by every layer: managed
//! services, repositories and archives, retention policies and run reports.

pub mod archive;
pub mod operation;
pub mod service;

pub use archive::{
    archive_label, parse_archive_timestamp, validate_archive_name, Archive, ArchiveRepository,
    RetentionPolicy, ARCHIVE_TIMESTAMP_FORMAT,
};
pub use operation::{OperationCounts, OperationKind, OperationResult, Verification};
pub use service::{ManagedService, Operation, ServiceId, SpaceThresholds};
