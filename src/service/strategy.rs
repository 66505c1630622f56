//! Per-service backup staging and post-restore fixup
//!
//! The orchestrators never branch on a service name; they ask the strategy
//! for the service at hand.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backup::BackupKind;
use crate::config::{CommandTimeouts, MailProfile, ManagerConfig};
use crate::error::{ManagerError, ManagerResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::models::{ManagedService, ServiceId};

/// Maximum depth searched for an export bundle inside an extraction
const BUNDLE_SEARCH_DEPTH: usize = 8;

/// What to hand to the archive engine for one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSource {
    pub paths: Vec<PathBuf>,
    pub excludes: Vec<String>,
    /// Staged data to remove once the run has succeeded
    pub cleanup: Option<PathBuf>,
}

/// Service-specific steps of the backup and restore state machines
pub trait ServiceStrategy {
    fn id(&self) -> ServiceId;

    /// Reject backup kinds the service does not support
    fn validate_kind(&self, kind: BackupKind) -> ManagerResult<()> {
        match kind {
            BackupKind::All => Ok(()),
            other => Err(ManagerError::Validation(format!(
                "Backup kind '{}' is only supported for the mail service",
                other
            ))),
        }
    }

    /// Prepare the data to archive
    fn stage_for_backup(
        &self,
        service: &ManagedService,
        kind: BackupKind,
    ) -> ManagerResult<StagedSource>;

    /// Find the directory inside `extraction_root` that becomes the
    /// service's restore target
    fn locate_payload(
        &self,
        service: &ManagedService,
        archive: &str,
        extraction_root: &Path,
    ) -> ManagerResult<PathBuf>;

    /// Bring the restored payload into service
    fn fixup_after_restore(&self, service: &ManagedService) -> ManagerResult<()>;
}

/// Payload of an archive made straight from the install directory:
/// the engine stores absolute paths without their leading `/`
fn install_payload(
    service: &ManagedService,
    archive: &str,
    extraction_root: &Path,
) -> ManagerResult<PathBuf> {
    let relative = service
        .install_path
        .strip_prefix("/")
        .unwrap_or(&service.install_path);
    let payload = extraction_root.join(relative);
    if payload.is_dir() {
        Ok(payload)
    } else {
        Err(ManagerError::NotFound {
            entity_type: "Archive content",
            identifier: format!("{} in {}", service.install_path.display(), archive),
        })
    }
}

fn stage_install_dir(service: &ManagedService) -> ManagerResult<StagedSource> {
    if !service.install_path.is_dir() {
        return Err(ManagerError::path_not_found(&service.install_path));
    }
    Ok(StagedSource {
        paths: vec![service.install_path.clone()],
        excludes: service.excludes.clone(),
        cleanup: None,
    })
}

fn fix_ownership(
    runner: &dyn CommandRunner,
    timeouts: &CommandTimeouts,
    service: &ManagedService,
) -> ManagerResult<()> {
    let Some(owner) = &service.owner else {
        return Ok(());
    };
    let spec = CommandSpec::new("chown", timeouts.extract)
        .args(["-R", owner.as_str()])
        .arg(service.restore_target.display().to_string());
    let output = runner.run(&spec).map_err(|e| ManagerError::Fixup {
        service: service.id.to_string(),
        detail: e.to_string(),
    })?;
    if !output.success() {
        return Err(ManagerError::Fixup {
            service: service.id.to_string(),
            detail: format!("chown failed: {}", output.stderr_tail()),
        });
    }
    tracing::info!(service = %service.id, owner = %owner, "ownership fixed");
    Ok(())
}

/// Reverse-proxy admin tool: archive the install directory as is
pub struct ProxyStrategy<'a> {
    runner: &'a dyn CommandRunner,
    timeouts: CommandTimeouts,
}

impl<'a> ProxyStrategy<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeouts: CommandTimeouts) -> Self {
        Self { runner, timeouts }
    }
}

impl ServiceStrategy for ProxyStrategy<'_> {
    fn id(&self) -> ServiceId {
        ServiceId::Proxy
    }

    fn stage_for_backup(
        &self,
        service: &ManagedService,
        kind: BackupKind,
    ) -> ManagerResult<StagedSource> {
        self.validate_kind(kind)?;
        stage_install_dir(service)
    }

    fn locate_payload(
        &self,
        service: &ManagedService,
        archive: &str,
        extraction_root: &Path,
    ) -> ManagerResult<PathBuf> {
        install_payload(service, archive, extraction_root)
    }

    fn fixup_after_restore(&self, service: &ManagedService) -> ManagerResult<()> {
        fix_ownership(self.runner, &self.timeouts, service)
    }
}

/// The management application itself
pub struct AppStrategy<'a> {
    runner: &'a dyn CommandRunner,
    timeouts: CommandTimeouts,
}

impl<'a> AppStrategy<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeouts: CommandTimeouts) -> Self {
        Self { runner, timeouts }
    }
}

impl ServiceStrategy for AppStrategy<'_> {
    fn id(&self) -> ServiceId {
        ServiceId::App
    }

    fn stage_for_backup(
        &self,
        service: &ManagedService,
        kind: BackupKind,
    ) -> ManagerResult<StagedSource> {
        self.validate_kind(kind)?;
        stage_install_dir(service)
    }

    fn locate_payload(
        &self,
        service: &ManagedService,
        archive: &str,
        extraction_root: &Path,
    ) -> ManagerResult<PathBuf> {
        install_payload(service, archive, extraction_root)
    }

    fn fixup_after_restore(&self, service: &ManagedService) -> ManagerResult<()> {
        fix_ownership(self.runner, &self.timeouts, service)
    }
}

/// Mail server: archive a consistent export made by its own tool, and
/// replay that export through the same tool on restore
pub struct MailStrategy<'a> {
    runner: &'a dyn CommandRunner,
    timeouts: CommandTimeouts,
    profile: MailProfile,
}

impl<'a> MailStrategy<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeouts: CommandTimeouts, profile: MailProfile) -> Self {
        Self {
            runner,
            timeouts,
            profile,
        }
    }

    fn is_bundle(&self, path: &Path) -> bool {
        path.is_dir()
            && path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(&self.profile.bundle_prefix))
                .unwrap_or(false)
    }

    /// Most recently modified bundle directly inside `dir`
    fn newest_bundle(&self, dir: &Path) -> ManagerResult<Option<PathBuf>> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !self.is_bundle(&path) {
                continue;
            }
            let modified = fs::metadata(&path)?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }
        Ok(newest.map(|(_, p)| p))
    }

    fn require_tool(&self) -> ManagerResult<()> {
        if self.profile.export_tool.is_file() {
            Ok(())
        } else {
            Err(ManagerError::path_not_found(&self.profile.export_tool))
        }
    }
}

impl ServiceStrategy for MailStrategy<'_> {
    fn id(&self) -> ServiceId {
        ServiceId::Mail
    }

    fn validate_kind(&self, _kind: BackupKind) -> ManagerResult<()> {
        Ok(())
    }

    fn stage_for_backup(
        &self,
        service: &ManagedService,
        kind: BackupKind,
    ) -> ManagerResult<StagedSource> {
        if !service.install_path.is_dir() {
            return Err(ManagerError::path_not_found(&service.install_path));
        }
        self.require_tool()?;
        fs::create_dir_all(&service.staging_dir).map_err(|e| {
            ManagerError::Io(format!(
                "Failed to create {}: {}",
                service.staging_dir.display(),
                e
            ))
        })?;

        tracing::info!(service = %service.id, kind = %kind, staging = %service.staging_dir.display(), "exporting mail data");
        let spec = CommandSpec::new(
            self.profile.export_tool.display().to_string(),
            self.timeouts.export,
        )
        .args(["backup", kind.as_str()])
        .env(
            "MAILCOW_BACKUP_LOCATION",
            service.staging_dir.display().to_string(),
        )
        .current_dir(&service.install_path);

        let output = self.runner.run(&spec)?;
        if !output.success() {
            return Err(ManagerError::ArchiveCreate {
                archive: format!("{} export", service.id),
                stderr_tail: output.stderr_tail(),
            });
        }

        let bundle = self.newest_bundle(&service.staging_dir)?.ok_or_else(|| {
            ManagerError::ArchiveCreate {
                archive: format!("{} export", service.id),
                stderr_tail: format!(
                    "export tool produced no {}* directory in {}",
                    self.profile.bundle_prefix,
                    service.staging_dir.display()
                ),
            }
        })?;
        tracing::info!(bundle = %bundle.display(), "mail export staged");

        Ok(StagedSource {
            paths: vec![bundle.clone()],
            excludes: Vec::new(),
            cleanup: Some(bundle),
        })
    }

    fn locate_payload(
        &self,
        _service: &ManagedService,
        archive: &str,
        extraction_root: &Path,
    ) -> ManagerResult<PathBuf> {
        let mut level = vec![extraction_root.to_path_buf()];
        for _ in 0..BUNDLE_SEARCH_DEPTH {
            let mut found: Vec<PathBuf> = Vec::new();
            let mut next = Vec::new();
            for dir in &level {
                for entry in fs::read_dir(dir)? {
                    let path = entry?.path();
                    if self.is_bundle(&path) {
                        found.push(path);
                    } else if path.is_dir() {
                        next.push(path);
                    }
                }
            }
            if !found.is_empty() {
                found.sort();
                if let Some(bundle) = found.pop() {
                    return Ok(bundle);
                }
            }
            level = next;
        }
        Err(ManagerError::NotFound {
            entity_type: "Archive content",
            identifier: format!("{}* directory in {}", self.profile.bundle_prefix, archive),
        })
    }

    fn fixup_after_restore(&self, service: &ManagedService) -> ManagerResult<()> {
        self.require_tool().map_err(|e| ManagerError::Fixup {
            service: service.id.to_string(),
            detail: format!("restore tool unavailable: {}", e),
        })?;

        tracing::info!(service = %service.id, bundle = %service.restore_target.display(), "replaying mail export");
        let spec = CommandSpec::new(
            self.profile.export_tool.display().to_string(),
            self.timeouts.export,
        )
        .arg("restore")
        .arg(service.restore_target.display().to_string())
        .env("COMPOSE_PROJECT_NAME", service.project_name.clone())
        .current_dir(&service.install_path);

        let output = self.runner.run(&spec).map_err(|e| ManagerError::Fixup {
            service: service.id.to_string(),
            detail: e.to_string(),
        })?;
        if !output.success() {
            return Err(ManagerError::Fixup {
                service: service.id.to_string(),
                detail: output.stderr_tail(),
            });
        }
        Ok(())
    }
}

/// The strategy for a service
pub fn strategy_for<'a>(
    id: ServiceId,
    runner: &'a dyn CommandRunner,
    config: &ManagerConfig,
) -> Box<dyn ServiceStrategy + 'a> {
    let timeouts = config.archive_tool.timeouts;
    match id {
        ServiceId::Proxy => Box::new(ProxyStrategy::new(runner, timeouts)),
        ServiceId::Mail => Box::new(MailStrategy::new(
            runner,
            timeouts,
            config.mail_profile.clone(),
        )),
        ServiceId::App => Box::new(AppStrategy::new(runner, timeouts)),
    }
}
