//! Sources for the repository passphrase
//!
//! The passphrase is looked up each time a command needs it and handed out as
//! a [`SecureString`], so callers can drop it as soon as the child process
//! has been spawned.

use std::fs;
use std::path::PathBuf;

use zeroize::Zeroizing;

use super::secret::SecureString;
use crate::config::settings::CredentialSettings;
use crate::error::{ManagerError, ManagerResult};

/// Supplies the archive decryption passphrase
pub trait CredentialProvider {
    /// Fetch the passphrase, or `None` if no source holds one
    fn passphrase(&self) -> ManagerResult<Option<SecureString>>;
}

/// Looks up the passphrase in the environment, then in dotenv-style files
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    env_var: String,
    env_files: Vec<PathBuf>,
}

impl EnvCredentialProvider {
    /// Create a provider reading `env_var`, then each file in order
    pub fn new(env_var: impl Into<String>, env_files: Vec<PathBuf>) -> Self {
        Self {
            env_var: env_var.into(),
            env_files,
        }
    }

    /// Build a provider from the `credentials` settings section
    pub fn from_settings(settings: &CredentialSettings) -> Self {
        Self::new(settings.env_var.clone(), settings.env_files.clone())
    }

    fn lookup_file(&self, path: &PathBuf) -> ManagerResult<Option<SecureString>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
            ManagerError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?);

        for line in contents.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().trim_start_matches("export ").trim();
            if key.eq_ignore_ascii_case(&self.env_var) {
                let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
                return Ok(Some(SecureString::new(value)));
            }
        }

        Ok(None)
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn passphrase(&self) -> ManagerResult<Option<SecureString>> {
        if let Ok(value) = std::env::var(&self.env_var) {
            if !value.is_empty() {
                return Ok(Some(SecureString::new(value)));
            }
        }

        for path in &self.env_files {
            if let Some(secret) = self.lookup_file(path)? {
                tracing::debug!(source = %path.display(), "passphrase found in env file");
                return Ok(Some(secret));
            }
        }

        Ok(None)
    }
}

/// A passphrase captured once, e.g. from an interactive prompt
#[derive(Debug, Clone)]
pub struct StaticCredential {
    secret: Option<SecureString>,
}

impl StaticCredential {
    pub fn new(secret: impl Into<SecureString>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }

    /// A provider that never has a passphrase
    pub fn missing() -> Self {
        Self { secret: None }
    }
}

impl CredentialProvider for StaticCredential {
    fn passphrase(&self) -> ManagerResult<Option<SecureString>> {
        Ok(self.secret.clone())
    }
}

/// Prompt for the passphrase on the terminal without echoing it
pub fn prompt_passphrase() -> ManagerResult<StaticCredential> {
    let entered = rpassword::prompt_password("Repository passphrase: ")
        .map_err(|e| ManagerError::Io(format!("Failed to read passphrase: {}", e)))?;
    Ok(StaticCredential::new(entered))
}
