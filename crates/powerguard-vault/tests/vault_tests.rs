use powerguard_vault::{CredentialStore, FileStore, Flag, MemoryStore, Secret, VaultError};
use tempfile::TempDir;

#[test]
fn test_verify_without_secret_is_false() {
    let store = MemoryStore::new();
    assert!(!store.has_secret());
    assert!(!store.verify(""));
    assert!(!store.verify("1234"));
}

#[test]
fn test_verify_matches_only_current_secret() {
    let store = MemoryStore::new();
    store.set(&Secret::from("1234")).unwrap();
    assert!(store.verify("1234"));
    assert!(!store.verify("4321"));

    store.set(&Secret::from("9999")).unwrap();
    assert!(!store.verify("1234"), "old secret must stop verifying at once");
    assert!(store.verify("9999"));
}

#[test]
fn test_flags_are_independent() {
    let store = MemoryStore::new();
    store.set_flag(Flag::ProtectionEnabled, true).unwrap();
    assert!(store.get_flag(Flag::ProtectionEnabled));
    assert!(!store.get_flag(Flag::PrivilegedHelperEnabled));

    store.set_flag(Flag::PrivilegedHelperEnabled, true).unwrap();
    store.set_flag(Flag::ProtectionEnabled, false).unwrap();
    assert!(!store.get_flag(Flag::ProtectionEnabled));
    assert!(store.get_flag(Flag::PrivilegedHelperEnabled));
}

#[test]
fn test_armed_memory_store() {
    let store = MemoryStore::armed("1234");
    assert!(store.has_secret());
    assert!(store.get_flag(Flag::ProtectionEnabled));
    assert!(!store.get_flag(Flag::PrivilegedHelperEnabled));
}

#[test]
fn test_file_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = FileStore::open(dir.path()).unwrap();
        store.set(&Secret::from("1234")).unwrap();
        store.set_flag(Flag::ProtectionEnabled, true).unwrap();
        store.set_flag(Flag::PrivilegedHelperEnabled, true).unwrap();
    }

    let reopened = FileStore::open(dir.path()).unwrap();
    assert!(reopened.verify("1234"));
    assert_eq!(reopened.get().unwrap().unwrap().expose(), "1234");
    assert!(reopened.get_flag(Flag::ProtectionEnabled));
    assert!(reopened.get_flag(Flag::PrivilegedHelperEnabled));
}

#[test]
fn test_file_store_fresh_directory_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path().join("nested")).unwrap();
    assert!(!store.has_secret());
    assert!(!store.get_flag(Flag::ProtectionEnabled));
}

#[test]
fn test_file_store_does_not_contain_plaintext() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.set(&Secret::from("correct-horse-battery")).unwrap();

    let bytes = std::fs::read(store.data_path()).unwrap();
    let needle = b"correct-horse-battery";
    assert!(!bytes.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn test_file_store_rejects_tampered_file() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.set(&Secret::from("1234")).unwrap();

    let path = store.data_path();
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(FileStore::open(dir.path()), Err(VaultError::Crypto)));
}

#[test]
fn test_file_store_rejects_wrong_size_key() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("vault.key"), b"short").unwrap();
    assert!(matches!(FileStore::open(dir.path()), Err(VaultError::Corrupt(_))));
}

#[cfg(unix)]
#[test]
fn test_file_store_files_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.set(&Secret::from("1234")).unwrap();

    for name in ["vault.key", "vault.bin"] {
        let mode = std::fs::metadata(dir.path().join(name))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o077, 0, "{name} is readable by others: {mode:o}");
    }
}
