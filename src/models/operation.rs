//! Operation result model
//!
//! Every backup or restore run ends in exactly one `OperationResult`, which
//! is what the CLI, the scheduler and the notification layer get to see.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::service::ServiceId;
use crate::error::{ErrorKind, ManagerError};

/// Kind of run being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Backup,
    Restore,
    Prune,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Backup => write!(f, "Backup"),
            OperationKind::Restore => write!(f, "Restore"),
            OperationKind::Prune => write!(f, "Prune"),
        }
    }
}

/// Outcome of the verification step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// Verification did not happen (the run stopped earlier)
    #[default]
    NotRun,
    Passed,
    Failed,
    /// The caller explicitly asked to skip it
    Skipped,
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    /// Archives in the repository when the run listed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archives_before: Option<usize>,
    /// Archives left after pruning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archives_after: Option<usize>,
    /// Archives deleted by pruning
    pub pruned: usize,
    /// Files written by extraction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_restored: Option<u64>,
}

/// Structured outcome of one orchestrated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub run_id: Uuid,
    pub service: ServiceId,
    pub kind: OperationKind,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Last stage the state machine reached (`DONE` or `FAILED` at the end)
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(default)]
    pub verification: Verification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub counts: OperationCounts,
    /// Safety snapshot taken before a restore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
    /// Non-fatal observations (skipped steps, cleanup problems)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl OperationResult {
    /// Start a new, not-yet-successful result
    pub fn new(service: ServiceId, kind: OperationKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            service,
            kind,
            success: false,
            started_at: Utc::now(),
            duration_ms: 0,
            stage: "INIT".into(),
            archive: None,
            verification: Verification::NotRun,
            error: None,
            error_detail: None,
            counts: OperationCounts::default(),
            snapshot: None,
            notes: Vec::new(),
        }
    }

    /// Record the error that ended the run
    pub fn fail(&mut self, err: &ManagerError) {
        self.success = false;
        self.error = Some(err.kind());
        self.error_detail = Some(err.to_string());
    }

    /// Add a non-fatal note
    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// Stamp the elapsed time
    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Process exit code for schedulers: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}
