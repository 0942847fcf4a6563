//! Persistent credential store.
//!
//! Layout inside the vault directory:
//!
//! - `vault.key`: 32 random bytes, created once per device, owner-only
//! - `vault.bin`: version (1) + nonce (12) + AES-256-GCM ciphertext of the
//!   JSON payload
//!
//! Every write uses a fresh nonce and replaces `vault.bin` atomically.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::store::{CredentialStore, Flag, Secret, VaultError, VaultPayload};

const KEY_FILE: &str = "vault.key";
const DATA_FILE: &str = "vault.bin";
const FORMAT_VERSION: u8 = 0x01;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Credential store sealed on disk with a per-device key.
pub struct FileStore {
    dir: PathBuf,
    key: Zeroizing<[u8; KEY_LEN]>,
    state: Mutex<VaultPayload>,
}

impl FileStore {
    /// Open the vault in `dir`, creating the directory and device key on
    /// first use.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, VaultError> {
        let dir = dir.as_ref().to_path_buf();
        create_private_dir(&dir)?;

        let key = load_or_create_key(&dir.join(KEY_FILE))?;
        let data_path = dir.join(DATA_FILE);
        let payload = match fs::read(&data_path) {
            Ok(bytes) => unseal(&key, &bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => VaultPayload::default(),
            Err(source) => {
                return Err(VaultError::Io {
                    path: data_path,
                    source,
                })
            }
        };

        tracing::debug!(dir = %dir.display(), "credential vault opened");
        Ok(Self {
            dir,
            key,
            state: Mutex::new(payload),
        })
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    /// Apply `change` to a copy of the payload, persist it, then commit it.
    /// A failed write leaves the in-memory state untouched.
    fn update(&self, change: impl FnOnce(&mut VaultPayload)) -> Result<(), VaultError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = state.clone();
        change(&mut next);

        let sealed = seal(&self.key, &next)?;
        let data_path = self.data_path();
        let tmp_path = self.dir.join(format!("{DATA_FILE}.tmp"));
        write_private(&tmp_path, &sealed)?;
        fs::rename(&tmp_path, &data_path).map_err(|source| VaultError::Io {
            path: data_path,
            source,
        })?;

        *state = next;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self) -> Result<Option<Secret>, VaultError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .secret())
    }

    fn set(&self, secret: &Secret) -> Result<(), VaultError> {
        self.update(|payload| payload.secret = Some(secret.expose().to_string()))?;
        tracing::info!("credential updated");
        Ok(())
    }

    fn get_flag(&self, flag: Flag) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flag(flag)
    }

    fn set_flag(&self, flag: Flag, value: bool) -> Result<(), VaultError> {
        self.update(|payload| {
            payload.flags.insert(flag.key().to_string(), value);
        })?;
        tracing::info!(flag = flag.key(), value, "flag updated");
        Ok(())
    }
}

fn seal(key: &[u8; KEY_LEN], payload: &VaultPayload) -> Result<Vec<u8>, VaultError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::Crypto)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
        .map_err(|_| VaultError::Crypto)?;

    let mut sealed = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    sealed.push(FORMAT_VERSION);
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn unseal(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<VaultPayload, VaultError> {
    if sealed.len() < 1 + NONCE_LEN + TAG_LEN {
        return Err(VaultError::Corrupt(format!(
            "{} bytes is shorter than the header",
            sealed.len()
        )));
    }
    if sealed[0] != FORMAT_VERSION {
        return Err(VaultError::Corrupt(format!(
            "unknown format version {}",
            sealed[0]
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::Crypto)?;
    let nonce = Nonce::from_slice(&sealed[1..1 + NONCE_LEN]);
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce, &sealed[1 + NONCE_LEN..])
            .map_err(|_| VaultError::Crypto)?,
    );
    Ok(serde_json::from_slice(&plaintext)?)
}

fn load_or_create_key(path: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>, VaultError> {
    match fs::read(path) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            if bytes.len() != KEY_LEN {
                return Err(VaultError::Corrupt(format!(
                    "device key has {} bytes, expected {KEY_LEN}",
                    bytes.len()
                )));
            }
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&bytes);
            Ok(key)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            OsRng.fill_bytes(&mut key[..]);
            write_private(path, &key[..])?;
            tracing::info!(path = %path.display(), "created device key");
            Ok(key)
        }
        Err(source) => Err(VaultError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn create_private_dir(dir: &Path) -> Result<(), VaultError> {
    fs::create_dir_all(dir).map_err(|source| VaultError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|source| {
            VaultError::Io {
                path: dir.to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    let io_err = |source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
