//! Resolved configuration snapshot
//!
//! `ManagerConfig` is built once per process from the settings file and is
//! handed, read-only, to every orchestrator constructor. Nothing reads the
//! settings file after this point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::settings::{NotificationSettings, RemoteSettings, ServiceSettings, Settings};
use crate::error::{ManagerError, ManagerResult};
use crate::models::{ArchiveRepository, ManagedService, RetentionPolicy, ServiceId, SpaceThresholds};

/// Time budgets for every class of external command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub create: Duration,
    pub extract: Duration,
    pub verify: Duration,
    pub list: Duration,
    pub prune: Duration,
    pub export: Duration,
    pub stop: Duration,
    pub start: Duration,
    pub probe: Duration,
}

/// How the archive tool is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveToolConfig {
    pub binary: String,
    pub remote_path: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub timeouts: CommandTimeouts,
    pub compact_after_prune: bool,
}

/// Mail-service specifics used by its strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailProfile {
    /// Absolute path of the export/restore helper
    pub export_tool: PathBuf,
    /// Directory-name prefix of the bundles the helper writes
    pub bundle_prefix: String,
}

/// Immutable per-run configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub remote: RemoteSettings,
    pub archive_tool: ArchiveToolConfig,
    pub retention: RetentionPolicy,
    pub credential_ref: String,
    pub staging_root: PathBuf,
    pub staging_retention_days: u32,
    pub mail_profile: MailProfile,
    pub notifications: NotificationSettings,
    compression: String,
    repository_names: RepositoryNames,
    proxy: ManagedService,
    mail: ManagedService,
    app: ManagedService,
}

#[derive(Debug, Clone)]
struct RepositoryNames {
    proxy: String,
    mail: String,
    app: String,
}

struct ServiceDefaults {
    install_path: &'static str,
    repository: &'static str,
    min_free: SpaceThresholds,
    post_start_wait_secs: u64,
    excludes: &'static [&'static str],
    compose: bool,
    owner: Option<&'static str>,
}

fn defaults_for(id: ServiceId) -> ServiceDefaults {
    match id {
        ServiceId::Proxy => ServiceDefaults {
            install_path: "/root/nginx",
            repository: "nginx-backup",
            min_free: SpaceThresholds {
                backup: 5,
                restore: 5,
            },
            post_start_wait_secs: 10,
            excludes: &["*.log", "*/logs/*", "*/.git/*", "*/tmp/*"],
            compose: true,
            owner: Some("root:root"),
        },
        ServiceId::Mail => ServiceDefaults {
            install_path: "/opt/mailcow-dockerized",
            repository: "mailcow-backup",
            min_free: SpaceThresholds {
                backup: 20,
                restore: 20,
            },
            post_start_wait_secs: 20,
            excludes: &[],
            compose: true,
            owner: None,
        },
        ServiceId::App => ServiceDefaults {
            install_path: "/opt/server-manager",
            repository: "server-manager-backup",
            min_free: SpaceThresholds {
                backup: 2,
                restore: 2,
            },
            post_start_wait_secs: 5,
            excludes: &["*/logs/*", "*/__pycache__/*", "*.pyc", "*/.git/*"],
            compose: false,
            owner: Some("root:root"),
        },
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn repository_name(id: ServiceId, file: &ServiceSettings) -> String {
    file.repository
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| defaults_for(id).repository.to_string())
}

fn resolve_service(
    id: ServiceId,
    file: &ServiceSettings,
    staging_root: &Path,
) -> ManagerResult<ManagedService> {
    let defaults = defaults_for(id);

    let install_path = file
        .install_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults.install_path));
    if !install_path.is_absolute() {
        return Err(ManagerError::Config(format!(
            "services.{}.install_path must be absolute: {}",
            id,
            install_path.display()
        )));
    }

    let staging_dir = staging_root.join(id.as_str());
    let restore_target = match id {
        ServiceId::Mail => file
            .restore_dir
            .clone()
            .unwrap_or_else(|| staging_dir.join("restore")),
        ServiceId::Proxy | ServiceId::App => install_path.clone(),
    };

    let project_name = file.project_name.clone().unwrap_or_else(|| {
        install_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| id.as_str().to_string())
    });

    let (stop, start, status) = if defaults.compose {
        (
            argv(&["docker", "compose", "down"]),
            argv(&["docker", "compose", "up", "-d"]),
            argv(&["docker", "compose", "ps", "--services", "--filter", "status=running"]),
        )
    } else {
        (Vec::new(), Vec::new(), Vec::new())
    };
    let status_command = file.status_command.clone().unwrap_or(status);
    let health_command = file
        .health_command
        .clone()
        .unwrap_or_else(|| status_command.clone());

    let min_free = SpaceThresholds {
        backup: file
            .min_free_gb
            .and_then(|m| m.backup)
            .unwrap_or(defaults.min_free.backup),
        restore: file
            .min_free_gb
            .and_then(|m| m.restore)
            .unwrap_or(defaults.min_free.restore),
    };

    let owner = match &file.owner {
        Some(owner) if owner.trim().is_empty() => None,
        Some(owner) => Some(owner.clone()),
        None => defaults.owner.map(str::to_string),
    };

    Ok(ManagedService {
        id,
        install_path,
        restore_target,
        staging_dir,
        project_name,
        stop_command: file.stop_command.clone().unwrap_or(stop),
        start_command: file.start_command.clone().unwrap_or(start),
        status_command,
        health_command,
        min_free,
        post_start_wait: Duration::from_secs(
            file.post_start_wait_secs
                .unwrap_or(defaults.post_start_wait_secs),
        ),
        health_poll_interval: Duration::from_secs(file.health_poll_secs.unwrap_or(2)),
        stop_for_backup: file.stop_for_backup.unwrap_or(false),
        excludes: file
            .excludes
            .clone()
            .unwrap_or_else(|| argv(defaults.excludes)),
        owner,
    })
}

impl ManagerConfig {
    /// Resolve the settings file into the per-run snapshot
    pub fn from_settings(settings: &Settings) -> ManagerResult<Self> {
        let staging_root = settings.backup.local_staging.clone();
        let services = &settings.services;

        let proxy = resolve_service(ServiceId::Proxy, &services.proxy, &staging_root)?;
        let mail = resolve_service(ServiceId::Mail, &services.mail, &staging_root)?;
        let app = resolve_service(ServiceId::App, &services.app, &staging_root)?;

        let export_tool = services
            .mail
            .export_tool
            .clone()
            .unwrap_or_else(|| PathBuf::from("helper-scripts/backup_and_restore.sh"));
        let export_tool = if export_tool.is_absolute() {
            export_tool
        } else {
            mail.install_path.join(export_tool)
        };
        let mail_profile = MailProfile {
            export_tool,
            bundle_prefix: services
                .mail
                .bundle_prefix
                .clone()
                .unwrap_or_else(|| "mailcow-".to_string()),
        };

        let t = &settings.borg.timeouts;
        let timeouts = CommandTimeouts {
            create: Duration::from_secs(t.create_secs),
            extract: Duration::from_secs(t.extract_secs),
            verify: Duration::from_secs(t.verify_secs),
            list: Duration::from_secs(t.list_secs),
            prune: Duration::from_secs(t.prune_secs),
            export: Duration::from_secs(t.export_secs),
            stop: Duration::from_secs(t.stop_secs),
            start: Duration::from_secs(t.start_secs),
            probe: Duration::from_secs(t.probe_secs),
        };

        if settings.borg.compression.trim().is_empty() {
            return Err(ManagerError::Config("borg.compression cannot be empty".into()));
        }

        Ok(Self {
            remote: settings.remote.clone(),
            archive_tool: ArchiveToolConfig {
                binary: settings.borg.binary.clone(),
                remote_path: settings.borg.remote_path.clone(),
                ssh_key: settings.remote.ssh_key.clone(),
                connect_timeout: Duration::from_secs(settings.remote.connect_timeout_secs),
                timeouts,
                compact_after_prune: settings.borg.compact_after_prune,
            },
            retention: settings.borg.retention,
            credential_ref: settings.credentials.env_var.clone(),
            staging_root,
            staging_retention_days: settings.backup.staging_retention_days,
            mail_profile,
            notifications: settings.notifications.clone(),
            compression: settings.borg.compression.clone(),
            repository_names: RepositoryNames {
                proxy: repository_name(ServiceId::Proxy, &services.proxy),
                mail: repository_name(ServiceId::Mail, &services.mail),
                app: repository_name(ServiceId::App, &services.app),
            },
            proxy,
            mail,
            app,
        })
    }

    /// The managed service for an identifier
    pub fn service(&self, id: ServiceId) -> &ManagedService {
        match id {
            ServiceId::Proxy => &self.proxy,
            ServiceId::Mail => &self.mail,
            ServiceId::App => &self.app,
        }
    }

    /// Replace one service description (tests and overrides)
    pub fn with_service(mut self, service: ManagedService) -> Self {
        match service.id {
            ServiceId::Proxy => self.proxy = service,
            ServiceId::Mail => self.mail = service,
            ServiceId::App => self.app = service,
        }
        self
    }

    /// The remote repository of a service
    pub fn repository(&self, id: ServiceId) -> ArchiveRepository {
        let name = match id {
            ServiceId::Proxy => &self.repository_names.proxy,
            ServiceId::Mail => &self.repository_names.mail,
            ServiceId::App => &self.repository_names.app,
        };
        ArchiveRepository {
            service: id,
            host: self.remote.host.clone(),
            user: self.remote.user.clone(),
            port: self.remote.port,
            path: format!("{}/{}", self.remote.base_path.trim_end_matches('/'), name),
            credential_ref: self.credential_ref.clone(),
            compression: self.compression.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::MinFreeSettings;

    #[test]
    fn test_defaults_resolve() {
        let config = ManagerConfig::from_settings(&Settings::default()).unwrap();

        let proxy = config.service(ServiceId::Proxy);
        assert_eq!(proxy.install_path, PathBuf::from("/root/nginx"));
        assert_eq!(proxy.project_name, "nginx");
        assert!(proxy.restores_install_dir());
        assert_eq!(proxy.min_free.backup, 5);
        assert_eq!(proxy.staging_dir, PathBuf::from("/var/backups/local/proxy"));

        let mail = config.service(ServiceId::Mail);
        assert!(!mail.restores_install_dir());
        assert_eq!(mail.restore_target, PathBuf::from("/var/backups/local/mail/restore"));
        assert_eq!(
            config.mail_profile.export_tool,
            PathBuf::from("/opt/mailcow-dockerized/helper-scripts/backup_and_restore.sh")
        );

        let app = config.service(ServiceId::App);
        assert!(app.stop_command.is_empty());
        assert_eq!(app.owner.as_deref(), Some("root:root"));

        assert_eq!(config.archive_tool.timeouts.verify, Duration::from_secs(300));
        assert_eq!(config.archive_tool.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_repository_per_service() {
        let mut settings = Settings::default();
        settings.remote.base_path = "/backups/".into();
        settings.services.app.repository = Some("manager".into());
        let config = ManagerConfig::from_settings(&settings).unwrap();

        assert_eq!(config.repository(ServiceId::Proxy).path, "/backups/nginx-backup");
        assert_eq!(config.repository(ServiceId::Mail).path, "/backups/mailcow-backup");
        assert_eq!(config.repository(ServiceId::App).path, "/backups/manager");
        assert_eq!(config.repository(ServiceId::App).compression, "zstd,3");
    }

    #[test]
    fn test_overrides_win() {
        let mut settings = Settings::default();
        settings.services.proxy.install_path = Some(PathBuf::from("/srv/npm"));
        settings.services.proxy.stop_for_backup = Some(true);
        settings.services.proxy.owner = Some(String::new());
        settings.services.proxy.min_free_gb = Some(MinFreeSettings {
            backup: Some(1),
            restore: None,
        });
        let config = ManagerConfig::from_settings(&settings).unwrap();

        let proxy = config.service(ServiceId::Proxy);
        assert_eq!(proxy.install_path, PathBuf::from("/srv/npm"));
        assert_eq!(proxy.restore_target, PathBuf::from("/srv/npm"));
        assert_eq!(proxy.project_name, "npm");
        assert!(proxy.stop_for_backup);
        assert!(proxy.owner.is_none());
        assert_eq!(proxy.min_free.backup, 1);
        assert_eq!(proxy.min_free.restore, 5);
    }

    #[test]
    fn test_relative_install_path_rejected() {
        let mut settings = Settings::default();
        settings.services.mail.install_path = Some(PathBuf::from("mailcow"));
        let err = ManagerConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }
}
