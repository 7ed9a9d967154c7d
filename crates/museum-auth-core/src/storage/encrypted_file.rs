//! Encrypted file-backed key-value store.
//!
//! The whole map lives in one file laid out as `salt || nonce || ciphertext`.
//! The key is derived from a passphrase with Argon2 and the map is sealed with
//! ChaCha20-Poly1305. Writes land in a temporary sibling that is renamed over
//! the original, so readers see the old map or the new one, never a mix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::{apply_edits, Edit, KeyValueStore};
use crate::error::StorageError;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Decrypted file contents plus the key material needed to rewrite them.
#[derive(Clone)]
struct Sealed {
    entries: BTreeMap<String, String>,
    salt: [u8; SALT_SIZE],
    key: [u8; KEY_SIZE],
}

impl Sealed {
    fn fresh(passphrase: &str) -> Result<Self, StorageError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        Ok(Self {
            entries: BTreeMap::new(),
            salt,
            key: derive_key(passphrase, &salt)?,
        })
    }
}

pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
    // Decrypted view of the file, filled on first successful read.
    cache: Mutex<Option<Sealed>>,
    revisions: watch::Sender<u64>,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            cache: Mutex::new(None),
            revisions,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<Sealed>, StorageError> {
        let path = self.path.clone();
        let passphrase = self.passphrase.clone();
        tokio::task::spawn_blocking(move || read_sealed(&path, &passphrase)).await?
    }
}

#[async_trait]
impl KeyValueStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = self.read_file().await?;
        }
        Ok(cache.as_ref().and_then(|sealed| sealed.entries.get(key).cloned()))
    }

    async fn apply(&self, edits: Vec<Edit>) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().await;

        let mut sealed = match cache.take() {
            Some(sealed) => sealed,
            None => match self.read_file().await {
                Ok(Some(sealed)) => sealed,
                Ok(None) => Sealed::fresh(&self.passphrase)?,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Unreadable credential file will be replaced");
                    Sealed::fresh(&self.passphrase)?
                }
            },
        };
        apply_edits(&mut sealed.entries, edits);

        let path = self.path.clone();
        let to_write = sealed.clone();
        tokio::task::spawn_blocking(move || write_sealed(&path, &to_write)).await??;

        *cache = Some(sealed);
        drop(cache);

        self.revisions.send_modify(|revision| *revision += 1);
        Ok(())
    }

    fn revisions(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_SIZE]) -> Result<[u8; KEY_SIZE], StorageError> {
    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Crypto(format!("Key derivation failed: {e}")))?;
    Ok(key)
}

fn read_sealed(path: &Path, passphrase: &str) -> Result<Option<Sealed>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    if bytes.len() < SALT_SIZE + NONCE_SIZE {
        return Err(StorageError::Crypto("Credential file is truncated".to_string()));
    }

    let (salt_bytes, rest) = bytes.split_at(SALT_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(salt_bytes);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| StorageError::Crypto("Decryption failed (wrong passphrase or tampered file)".to_string()))?;

    let entries: BTreeMap<String, String> = serde_json::from_slice(&plaintext)?;
    debug!(path = %path.display(), entries = entries.len(), "Credential file loaded");
    Ok(Some(Sealed { entries, salt, key }))
}

fn write_sealed(path: &Path, sealed: &Sealed) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let plaintext = serde_json::to_vec(&sealed.entries)?;
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&sealed.key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| StorageError::Crypto(format!("Encryption failed: {e}")))?;

    let mut output = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&sealed.salt);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, &output)?;
    restrict_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, value: &str) -> Edit {
        Edit::Set(key.to_string(), value.to_string())
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path().join("credentials.enc"), "pw");
        assert_eq!(store.get("auth_user").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.enc");

        let store = EncryptedFileStore::new(&path, "pw");
        assert_eq!(store.path(), path.as_path());
        store.apply(vec![set("a", "1"), set("b", "2")]).await.unwrap();
        drop(store);

        let reopened = EncryptedFileStore::new(&path, "pw");
        assert_eq!(reopened.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        let store = EncryptedFileStore::new(&path, "pw");
        store.apply(vec![set("auth_tokens", "very-secret-token")]).await.unwrap();

        let raw = std::fs::read(&path).unwrap();
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("very-secret-token"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        EncryptedFileStore::new(&path, "right")
            .apply(vec![set("a", "1")])
            .await
            .unwrap();

        let other = EncryptedFileStore::new(&path, "wrong");
        assert!(matches!(other.get("a").await, Err(StorageError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        std::fs::write(&path, b"garbage").unwrap();

        let store = EncryptedFileStore::new(&path, "pw");
        assert!(store.get("a").await.is_err());

        store.apply(vec![set("a", "1")]).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        let reopened = EncryptedFileStore::new(&path, "pw");
        assert_eq!(reopened.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        let store = EncryptedFileStore::new(&path, "pw");
        store.apply(vec![set("a", "1")]).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
