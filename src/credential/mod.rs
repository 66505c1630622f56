//! Repository passphrase handling
//!
//! The passphrase is the single credential whose loss makes every archive
//! unreadable. It is kept in memory only, zeroed on drop, and never logged.

pub mod provider;
pub mod secret;

pub use provider::{prompt_passphrase, CredentialProvider, EnvCredentialProvider, StaticCredential};
pub use secret::SecureString;
