use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Vault payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Vault file is corrupt: {0}")]
    Corrupt(String),

    #[error("Vault could not be sealed or opened")]
    Crypto,
}

/// Boolean feature flags kept next to the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Power-menu interception is switched on.
    ProtectionEnabled,
    /// The privileged helper should veto power actions while the gate is up.
    PrivilegedHelperEnabled,
}

impl Flag {
    pub fn key(self) -> &'static str {
        match self {
            Flag::ProtectionEnabled => "protection_enabled",
            Flag::PrivilegedHelperEnabled => "privileged_helper_enabled",
        }
    }
}

/// The stored credential. Wiped from memory on drop, never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a candidate.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Key-value store holding one secret and the feature flags.
///
/// Implementations must persist across restarts (except [`crate::MemoryStore`])
/// and must not be readable by other processes.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<Secret>, VaultError>;

    /// Replace the secret. Previously valid candidates stop verifying at once.
    fn set(&self, secret: &Secret) -> Result<(), VaultError>;

    /// `true` iff `candidate` equals the stored secret. Storage failures
    /// verify as `false`.
    fn verify(&self, candidate: &str) -> bool {
        match self.get() {
            Ok(Some(secret)) => secret.matches(candidate),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "credential store unreadable during verify");
                false
            }
        }
    }

    fn has_secret(&self) -> bool {
        matches!(self.get(), Ok(Some(_)))
    }

    /// Unset flags read as `false`.
    fn get_flag(&self, flag: Flag) -> bool;

    fn set_flag(&self, flag: Flag, value: bool) -> Result<(), VaultError>;
}

/// Serialized contents of a vault.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct VaultPayload {
    #[serde(default)]
    pub(crate) secret: Option<String>,
    #[serde(default)]
    #[zeroize(skip)]
    pub(crate) flags: BTreeMap<String, bool>,
}

impl VaultPayload {
    pub(crate) fn secret(&self) -> Option<Secret> {
        self.secret.as_deref().map(Secret::from)
    }

    pub(crate) fn flag(&self, flag: Flag) -> bool {
        self.flags.get(flag.key()).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::from("1234");
        assert_eq!(format!("{secret:?}"), "Secret(<redacted>)");
    }

    #[test]
    fn test_secret_matches_exact_candidate_only() {
        let secret = Secret::from("1234");
        assert!(secret.matches("1234"));
        assert!(!secret.matches("12345"));
        assert!(!secret.matches("123"));
        assert!(!secret.matches(""));
    }

    #[test]
    fn test_unset_flag_reads_false() {
        let payload = VaultPayload::default();
        assert!(!payload.flag(Flag::ProtectionEnabled));
        assert!(!payload.flag(Flag::PrivilegedHelperEnabled));
    }
}
