//! Preflight checker

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::disk::SpaceProbe;
use crate::credential::CredentialProvider;
use crate::error::{ManagerError, ManagerResult};
use crate::models::{ManagedService, Operation};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One failed precondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightFailure {
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },
    SpaceUnknown {
        path: PathBuf,
        detail: String,
    },
    Unreachable {
        host: String,
        port: u16,
        detail: String,
    },
    MissingCredential {
        reference: String,
    },
    CredentialUnreadable {
        detail: String,
    },
}

impl fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSpace {
                path,
                available,
                required,
            } => write!(
                f,
                "insufficient disk space at {}: {:.1} GiB available, {:.1} GiB required",
                path.display(),
                *available as f64 / GIB,
                *required as f64 / GIB
            ),
            Self::SpaceUnknown { path, detail } => {
                write!(f, "cannot determine free space at {}: {}", path.display(), detail)
            }
            Self::Unreachable { host, port, detail } => {
                write!(f, "backup host {}:{} unreachable: {}", host, port, detail)
            }
            Self::MissingCredential { reference } => {
                write!(f, "repository passphrase not available ({})", reference)
            }
            Self::CredentialUnreadable { detail } => {
                write!(f, "repository passphrase could not be read: {}", detail)
            }
        }
    }
}

/// Outcome of a preflight check: every failed condition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightResult {
    pub failures: Vec<PreflightFailure>,
}

impl PreflightResult {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Err(ManagerError::Preflight)` listing every failure
    pub fn into_result(self) -> ManagerResult<()> {
        if self.passed() {
            Ok(())
        } else {
            Err(ManagerError::Preflight(
                self.failures.iter().map(ToString::to_string).collect(),
            ))
        }
    }
}

/// Gate in front of every mutating operation
pub trait Preflight {
    fn check(&self, service: &ManagedService, operation: Operation) -> PreflightResult;
}

/// Checks free space, backup-host reachability and the passphrase
pub struct PreflightChecker<'a> {
    credentials: &'a dyn CredentialProvider,
    credential_ref: String,
    space: &'a dyn SpaceProbe,
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(
        credentials: &'a dyn CredentialProvider,
        credential_ref: impl Into<String>,
        space: &'a dyn SpaceProbe,
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            credential_ref: credential_ref.into(),
            space,
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    /// Directory whose filesystem receives the operation's data, if any
    fn space_path(service: &ManagedService, operation: Operation) -> Option<PathBuf> {
        match operation {
            Operation::Backup => Some(service.staging_dir.clone()),
            Operation::Restore => Some(
                service
                    .restore_target
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| service.restore_target.clone()),
            ),
            Operation::Prune => None,
        }
    }

    fn check_space(&self, service: &ManagedService, operation: Operation) -> Option<PreflightFailure> {
        let wanted = Self::space_path(service, operation)?;
        let Some(path) = ManagedService::existing_ancestor(&wanted) else {
            return Some(PreflightFailure::SpaceUnknown {
                path: wanted,
                detail: "no existing ancestor directory".into(),
            });
        };
        let required = service.min_free.bytes_for(operation);
        match self.space.available_bytes(&path) {
            Ok(available) if available >= required => None,
            Ok(available) => Some(PreflightFailure::InsufficientSpace {
                path,
                available,
                required,
            }),
            Err(e) => Some(PreflightFailure::SpaceUnknown {
                path,
                detail: e.to_string(),
            }),
        }
    }

    fn check_reachable(&self) -> Option<PreflightFailure> {
        if self.host.is_empty() {
            return None;
        }
        let unreachable = |detail: String| PreflightFailure::Unreachable {
            host: self.host.clone(),
            port: self.port,
            detail,
        };

        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs.collect::<Vec<_>>(),
            Err(e) => {
                return Some(unreachable(format!(
                    "cannot resolve host: {} (set remote.probe_host if this is an ssh alias)",
                    e
                )))
            }
        };
        if addrs.is_empty() {
            return Some(unreachable("host resolved to no addresses".into()));
        }

        let mut last_error = String::new();
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(_) => return None,
                Err(e) => last_error = e.to_string(),
            }
        }
        Some(unreachable(last_error))
    }

    fn check_credential(&self) -> Option<PreflightFailure> {
        match self.credentials.passphrase() {
            Ok(Some(secret)) if !secret.is_blank() => None,
            Ok(_) => Some(PreflightFailure::MissingCredential {
                reference: self.credential_ref.clone(),
            }),
            Err(e) => Some(PreflightFailure::CredentialUnreadable {
                detail: e.to_string(),
            }),
        }
    }
}

impl Preflight for PreflightChecker<'_> {
    fn check(&self, service: &ManagedService, operation: Operation) -> PreflightResult {
        let failures: Vec<PreflightFailure> = [
            self.check_space(service, operation),
            self.check_reachable(),
            self.check_credential(),
        ]
        .into_iter()
        .flatten()
        .collect();

        for failure in &failures {
            tracing::warn!(service = %service.id, operation = %operation, "preflight: {}", failure);
        }
        if failures.is_empty() {
            tracing::debug!(service = %service.id, operation = %operation, "preflight passed");
        }
        PreflightResult { failures }
    }
}
