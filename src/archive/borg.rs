//! `borg` adapter for [`ArchiveStore`]
//!
//! The passphrase is fetched from the credential provider for each command,
//! handed to the child through its environment, and dropped (zeroed) as soon
//! as the command returns. The SSH transport is configured through
//! `BORG_RSH`; host keys and authentication are the transport's business.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::Deserialize;

use super::store::{count_files, require_empty_dir, ArchiveStore};
use crate::config::ArchiveToolConfig;
use crate::credential::CredentialProvider;
use crate::error::{ManagerError, ManagerResult};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::{parse_archive_timestamp, validate_archive_name, Archive, ArchiveRepository};

/// Timestamp format of `start`/`time` fields in borg JSON output
const BORG_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Deserialize)]
struct ListOutput {
    #[serde(default)]
    archives: Vec<ListedArchive>,
}

#[derive(Debug, Deserialize)]
struct ListedArchive {
    name: String,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateOutput {
    archive: CreatedArchive,
}

#[derive(Debug, Deserialize)]
struct CreatedArchive {
    name: String,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    stats: Option<CreatedStats>,
}

#[derive(Debug, Deserialize)]
struct CreatedStats {
    #[serde(default)]
    original_size: Option<u64>,
}

fn parse_borg_time(value: Option<&str>) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value?, BORG_TIME_FORMAT).ok()
}

/// Map a failed borg invocation onto the error taxonomy
///
/// borg reports everything through stderr text and a generic exit code, so
/// the classification matches the messages of the failure modes the
/// orchestrators react to differently.
pub fn classify_failure(
    repo: &ArchiveRepository,
    archive: Option<&str>,
    output: &CommandOutput,
) -> ManagerError {
    let stderr = output.stderr.to_lowercase();
    let detail = output.stderr_tail();
    let repository = repo.url();

    let has = |needles: &[&str]| needles.iter().any(|n| stderr.contains(n));

    if has(&["failed to create/acquire the lock", "lock.exclusive", "locktimeout", "lockerror"]) {
        return ManagerError::RepositoryLocked { repository };
    }
    if has(&[
        "passphrase supplied in borg_passphrase",
        "passphrasewrong",
        "passphrase is incorrect",
        "permission denied (publickey",
    ]) {
        return ManagerError::Auth { repository, detail };
    }
    if has(&["does not exist", "doesnotexist", "is not a valid repository"]) {
        return match archive {
            Some(name) if stderr.contains("archive") => ManagerError::archive_not_found(name),
            _ => ManagerError::NotFound {
                entity_type: "Repository",
                identifier: repository,
            },
        };
    }
    if has(&[
        "connection closed by remote host",
        "connection refused",
        "connection timed out",
        "connection reset",
        "could not resolve hostname",
        "no route to host",
        "connectionclosed",
        "remote: ssh",
    ]) {
        return ManagerError::Connectivity { repository, detail };
    }
    if has(&["integrity error", "integrityerror", "checksum mismatch", "segment checksum"]) {
        return ManagerError::CorruptArchive {
            archive: archive.unwrap_or("<repository>").to_string(),
            detail,
        };
    }

    ManagerError::Command {
        program: "borg".into(),
        code: output.code,
        stderr_tail: detail,
    }
}

/// Drives the `borg` command-line tool
pub struct BorgStore<'a> {
    runner: &'a dyn CommandRunner,
    credentials: &'a dyn CredentialProvider,
    tool: ArchiveToolConfig,
}

impl<'a> BorgStore<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        credentials: &'a dyn CredentialProvider,
        tool: ArchiveToolConfig,
    ) -> Self {
        Self {
            runner,
            credentials,
            tool,
        }
    }

    /// Value for `BORG_RSH`
    fn rsh(&self) -> String {
        let mut rsh = String::from("ssh");
        if let Some(key) = &self.tool.ssh_key {
            rsh.push_str(&format!(" -i {}", key.display()));
        }
        rsh.push_str(&format!(
            " -o BatchMode=yes -o ConnectTimeout={}",
            self.tool.connect_timeout.as_secs().max(1)
        ));
        rsh
    }

    /// A borg command with transport and credential environment applied
    fn command(&self, subcommand: &str, timeout: Duration) -> ManagerResult<CommandSpec> {
        let passphrase = self
            .credentials
            .passphrase()?
            .filter(|p| !p.is_blank())
            .ok_or_else(|| ManagerError::Auth {
                repository: "<any>".into(),
                detail: "no repository passphrase available".into(),
            })?;

        let mut spec = CommandSpec::new(self.tool.binary.clone(), timeout)
            .arg(subcommand)
            .env("BORG_RSH", self.rsh())
            .env("BORG_EXIT_CODES", "legacy")
            .secret_env("BORG_PASSPHRASE", passphrase);
        if let Some(remote_path) = &self.tool.remote_path {
            spec = spec.env("BORG_REMOTE_PATH", remote_path.clone());
        }
        Ok(spec)
    }

    fn run(&self, spec: CommandSpec) -> ManagerResult<CommandOutput> {
        let output = self.runner.run(&spec);
        // spec (and the passphrase inside it) is dropped here
        drop(spec);
        output
    }

    fn delete(&self, repo: &ArchiveRepository, name: &str) -> ManagerResult<bool> {
        let spec = self
            .command("delete", self.tool.timeouts.prune)?
            .arg(repo.archive_locator(name));
        let output = self.run(spec)?;
        if output.success() {
            return Ok(true);
        }
        match classify_failure(repo, Some(name), &output) {
            err if err.is_not_found() => Ok(false),
            err => Err(err),
        }
    }

    fn compact(&self, repo: &ArchiveRepository) -> ManagerResult<()> {
        let spec = self
            .command("compact", self.tool.timeouts.prune)?
            .arg(repo.url());
        let output = self.run(spec)?;
        if !output.success() {
            return Err(classify_failure(repo, None, &output));
        }
        Ok(())
    }
}

impl ArchiveStore for BorgStore<'_> {
    fn create(
        &self,
        repo: &ArchiveRepository,
        sources: &[PathBuf],
        excludes: &[String],
        label: &str,
    ) -> ManagerResult<Archive> {
        validate_archive_name(label)?;
        if sources.is_empty() {
            return Err(ManagerError::Validation("No source paths to archive".into()));
        }
        for source in sources {
            if !source.exists() {
                return Err(ManagerError::ArchiveCreate {
                    archive: label.to_string(),
                    stderr_tail: format!("source path does not exist: {}", source.display()),
                });
            }
        }

        let mut spec = self
            .command("create", self.tool.timeouts.create)?
            .args(["--json", "--compression", repo.compression.as_str()]);
        for pattern in excludes {
            spec = spec.args(["--exclude", pattern.as_str()]);
        }
        spec = spec
            .arg(repo.archive_locator(label))
            .args(sources.iter().map(|s| s.display().to_string()));

        tracing::info!(repository = %repo.url(), archive = %label, "creating archive");
        let output = self.run(spec)?;
        if !output.success() {
            return Err(match classify_failure(repo, Some(label), &output) {
                ManagerError::Command { stderr_tail, .. } => ManagerError::ArchiveCreate {
                    archive: label.to_string(),
                    stderr_tail,
                },
                other => other,
            });
        }

        let parsed: Option<CreateOutput> = serde_json::from_str(&output.stdout).ok();
        let created_at = parsed
            .as_ref()
            .and_then(|p| parse_borg_time(p.archive.start.as_deref()))
            .or_else(|| parse_archive_timestamp(label))
            .unwrap_or_else(|| Local::now().naive_local());
        let mut archive = Archive::new(
            parsed
                .as_ref()
                .map(|p| p.archive.name.clone())
                .unwrap_or_else(|| label.to_string()),
            created_at,
        );
        archive.size_bytes = parsed
            .as_ref()
            .and_then(|p| p.archive.stats.as_ref())
            .and_then(|s| s.original_size);

        tracing::info!(archive = %archive.name, size_bytes = ?archive.size_bytes, "archive created");
        Ok(archive)
    }

    fn list(&self, repo: &ArchiveRepository) -> ManagerResult<Vec<Archive>> {
        let spec = self
            .command("list", self.tool.timeouts.list)?
            .arg("--json")
            .arg(repo.url());
        let output = self.run(spec)?;
        if !output.success() {
            let err = classify_failure(repo, None, &output);
            if err.is_not_found() {
                tracing::info!(repository = %repo.url(), "repository does not exist yet");
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let listed: ListOutput = serde_json::from_str(&output.stdout)?;
        let mut archives: Vec<Archive> = listed
            .archives
            .into_iter()
            .filter_map(|a| {
                let created_at = parse_borg_time(a.start.as_deref())
                    .or_else(|| parse_borg_time(a.time.as_deref()))
                    .or_else(|| parse_archive_timestamp(&a.name));
                match created_at {
                    Some(at) => Some(Archive::new(a.name, at)),
                    None => {
                        tracing::warn!(archive = %a.name, "skipping archive without a readable timestamp");
                        None
                    }
                }
            })
            .collect();

        archives.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(archives)
    }

    fn verify(&self, repo: &ArchiveRepository, archive: &str) -> ManagerResult<bool> {
        validate_archive_name(archive)?;
        let spec = self
            .command("list", self.tool.timeouts.verify)?
            .arg("--short")
            .arg(repo.archive_locator(archive));
        let output = self.run(spec)?;

        if !output.success() {
            let err = classify_failure(repo, Some(archive), &output);
            tracing::warn!(archive = %archive, error = %err, "archive verification failed");
            return Ok(false);
        }
        if output.stdout.trim().is_empty() {
            tracing::warn!(archive = %archive, "archive listing is empty");
            return Ok(false);
        }
        Ok(true)
    }

    fn extract(
        &self,
        repo: &ArchiveRepository,
        archive: &str,
        destination: &Path,
    ) -> ManagerResult<u64> {
        validate_archive_name(archive)?;
        require_empty_dir(destination)?;

        let spec = self
            .command("extract", self.tool.timeouts.extract)?
            .arg(repo.archive_locator(archive))
            .current_dir(destination);

        tracing::info!(archive = %archive, destination = %destination.display(), "extracting archive");
        let output = self.run(spec)?;
        if !output.success() {
            return Err(classify_failure(repo, Some(archive), &output));
        }
        count_files(destination)
    }

    fn prune_listed(
        &self,
        repo: &ArchiveRepository,
        listed: &[Archive],
        keep: &BTreeSet<String>,
    ) -> ManagerResult<Vec<String>> {
        let mut deleted = Vec::new();
        for archive in listed.iter().filter(|a| !keep.contains(&a.name)) {
            tracing::info!(repository = %repo.url(), archive = %archive.name, "deleting archive");
            if self.delete(repo, &archive.name)? {
                deleted.push(archive.name.clone());
            }
        }

        if self.tool.compact_after_prune && !deleted.is_empty() {
            self.compact(repo)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManagerConfig, Settings};
    use crate::credential::StaticCredential;
    use crate::models::ServiceId;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn tool() -> ArchiveToolConfig {
        ManagerConfig::from_settings(&Settings::default())
            .unwrap()
            .archive_tool
    }

    fn repo() -> ArchiveRepository {
        ManagerConfig::from_settings(&Settings::default())
            .unwrap()
            .repository(ServiceId::App)
    }

    const LIST_JSON: &str = r#"{"archives": [
        {"name": "app-20250101_020000", "start": "2025-01-01T02:00:00.000000"},
        {"name": "app-20250103_020000", "start": "2025-01-03T02:00:01.250000"},
        {"name": "app-20250102_020000", "time": "2025-01-02T02:00:00.000000"}
    ]}"#;

    #[test]
    fn test_list_sorts_newest_first() {
        let runner = ScriptedRunner::new();
        runner.push_ok(LIST_JSON);
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        let names: Vec<String> = store.list(&repo()).unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(
            names,
            vec!["app-20250103_020000", "app-20250102_020000", "app-20250101_020000"]
        );
    }

    #[test]
    fn test_list_missing_repository_is_empty() {
        let runner = ScriptedRunner::new();
        runner.push_fail(2, "Repository ssh://root@rsync-backup/./backups/server-manager-backup does not exist.");
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        assert!(store.list(&repo()).unwrap().is_empty());
    }

    #[test]
    fn test_command_environment() {
        let runner = ScriptedRunner::new();
        runner.push_ok(r#"{"archives": []}"#);
        let cred = StaticCredential::new("s3cret");
        let store = BorgStore::new(&runner, &cred, tool());
        store.list(&repo()).unwrap();

        let calls = runner.calls();
        let spec = &calls[0];
        assert_eq!(spec.program, "borg");
        assert_eq!(spec.args[0], "list");
        assert_eq!(spec.env_value("BORG_REMOTE_PATH"), Some("borg14"));
        let rsh = spec.env_value("BORG_RSH").unwrap();
        assert!(rsh.contains("-i /root/.ssh/backup_key"));
        assert!(rsh.contains("ConnectTimeout=5"));
        assert_eq!(spec.secret_env[0].1.as_str(), "s3cret");
        assert!(!spec.env.iter().any(|(_, v)| v.contains("s3cret")));
    }

    #[test]
    fn test_missing_passphrase_is_auth_error() {
        let runner = ScriptedRunner::new();
        let cred = StaticCredential::missing();
        let store = BorgStore::new(&runner, &cred, tool());
        let err = store.list(&repo()).unwrap_err();
        assert!(matches!(err, ManagerError::Auth { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_create_builds_argument_vector() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.push_ok(
            r#"{"archive": {"name": "app-20250102_020000", "start": "2025-01-02T02:00:00.000000", "stats": {"original_size": 4096}}}"#,
        );
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        let archive = store
            .create(
                &repo(),
                &[temp.path().to_path_buf()],
                &["*.log".to_string()],
                "app-20250102_020000",
            )
            .unwrap();
        assert_eq!(archive.size_bytes, Some(4096));

        let spec = &runner.calls()[0];
        assert_eq!(
            &spec.args[..6],
            &["create", "--json", "--compression", "zstd,3", "--exclude", "*.log"]
        );
        assert!(spec.args[6].ends_with("::app-20250102_020000"));
        assert_eq!(spec.args[7], temp.path().display().to_string());
    }

    #[test]
    fn test_create_failure_carries_stderr_tail() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.push_fail(2, "some unexpected failure");
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        let err = store
            .create(&repo(), &[temp.path().to_path_buf()], &[], "app-20250102_020000")
            .unwrap_err();
        match err {
            ManagerError::ArchiveCreate { stderr_tail, .. } => {
                assert_eq!(stderr_tail, "some unexpected failure")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_create_rejects_injected_label() {
        let runner = ScriptedRunner::new();
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());
        let err = store
            .create(&repo(), &[PathBuf::from("/")], &[], "x::y")
            .unwrap_err();
        assert!(err.is_validation());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_verify_outcomes() {
        let runner = ScriptedRunner::new();
        runner.push_ok("opt/server-manager/app.py\n");
        runner.push_ok("");
        runner.push_fail(2, "Data integrity error: Segment checksum mismatch");
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        assert!(store.verify(&repo(), "app-20250102_020000").unwrap());
        assert!(!store.verify(&repo(), "app-20250102_020000").unwrap());
        assert!(!store.verify(&repo(), "app-20250102_020000").unwrap());
    }

    #[test]
    fn test_extract_runs_in_destination() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::with_handler(|spec| {
            let cwd = spec.cwd.clone().unwrap();
            std::fs::create_dir_all(cwd.join("opt/app")).unwrap();
            std::fs::write(cwd.join("opt/app/a"), "1").unwrap();
            std::fs::write(cwd.join("opt/app/b"), "2").unwrap();
            Ok(CommandOutput::ok(""))
        });
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        let count = store.extract(&repo(), "app-20250102_020000", temp.path()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(runner.calls()[0].cwd.as_deref(), Some(temp.path()));
    }

    #[test]
    fn test_prune_deletes_only_unkept_and_is_idempotent() {
        let runner = ScriptedRunner::new();
        runner.push_ok(LIST_JSON);
        runner.push_ok(""); // delete 0101
        runner.push_ok(""); // delete 0102
        runner.push_ok(""); // compact
        runner.push_ok(r#"{"archives": [{"name": "app-20250103_020000", "start": "2025-01-03T02:00:00.000000"}]}"#);
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        let keep: BTreeSet<String> = ["app-20250103_020000".to_string()].into();
        let deleted = store.prune(&repo(), &keep).unwrap();
        assert_eq!(deleted, vec!["app-20250102_020000", "app-20250101_020000"]);

        let again = store.prune(&repo(), &keep).unwrap();
        assert!(again.is_empty());

        let subcommands: Vec<String> = runner.calls().iter().map(|c| c.args[0].clone()).collect();
        assert_eq!(subcommands, vec!["list", "delete", "delete", "compact", "list"]);
    }

    #[test]
    fn test_prune_listed_never_lists_again() {
        let runner = ScriptedRunner::new();
        runner.push_ok(""); // delete 0101
        let cred = StaticCredential::new("pw");
        let store = BorgStore::new(&runner, &cred, tool());

        let listed = vec![
            Archive::from_name("app-20250102_020000").unwrap(),
            Archive::from_name("app-20250101_020000").unwrap(),
        ];
        let keep: BTreeSet<String> = ["app-20250102_020000".to_string()].into();
        let deleted = store.prune_listed(&repo(), &listed, &keep).unwrap();

        assert_eq!(deleted, vec!["app-20250101_020000"]);
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args[0], "delete");
        assert!(calls[0].args.iter().any(|a| a.ends_with("::app-20250101_020000")));
        assert_eq!(calls[1].args[0], "compact");
    }

    #[test]
    fn test_classify_failure() {
        let r = repo();
        let lock = CommandOutput::failed(2, "Failed to create/acquire the lock /repo/lock.exclusive (timeout).");
        assert!(matches!(classify_failure(&r, None, &lock), ManagerError::RepositoryLocked { .. }));

        let auth = CommandOutput::failed(2, "passphrase supplied in BORG_PASSPHRASE is incorrect.");
        assert!(matches!(classify_failure(&r, None, &auth), ManagerError::Auth { .. }));

        let conn = CommandOutput::failed(2, "ssh: Could not resolve hostname rsync-backup\nConnection closed by remote host");
        assert!(matches!(classify_failure(&r, None, &conn), ManagerError::Connectivity { .. }));

        let missing = CommandOutput::failed(2, "Archive app-1 does not exist");
        assert!(classify_failure(&r, Some("app-1"), &missing).is_not_found());

        let corrupt = CommandOutput::failed(2, "Data integrity error: chunk checksum mismatch");
        assert!(matches!(
            classify_failure(&r, Some("app-1"), &corrupt),
            ManagerError::CorruptArchive { .. }
        ));

        let other = CommandOutput::failed(2, "weird");
        assert!(matches!(classify_failure(&r, None, &other), ManagerError::Command { .. }));
    }
}
