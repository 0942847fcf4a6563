//! Credential storage for the authentication gate.
//!
//! - [`store`]: the [`CredentialStore`] contract, [`Secret`] and [`Flag`]
//! - [`memory`]: process-local store
//! - [`file`]: persistent store sealed with AES-256-GCM

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CredentialStore, Flag, Secret, VaultError};
