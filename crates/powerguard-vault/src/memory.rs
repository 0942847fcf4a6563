use std::sync::{Mutex, PoisonError};

use crate::store::{CredentialStore, Flag, Secret, VaultError, VaultPayload};

/// Credential store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<VaultPayload>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with a secret set and protection switched on.
    pub fn armed(secret: &str) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.secret = Some(secret.to_string());
            state
                .flags
                .insert(Flag::ProtectionEnabled.key().to_string(), true);
        }
        store
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Result<Option<Secret>, VaultError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .secret())
    }

    fn set(&self, secret: &Secret) -> Result<(), VaultError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .secret = Some(secret.expose().to_string());
        Ok(())
    }

    fn get_flag(&self, flag: Flag) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flag(flag)
    }

    fn set_flag(&self, flag: Flag, value: bool) -> Result<(), VaultError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flags
            .insert(flag.key().to_string(), value);
        Ok(())
    }
}
