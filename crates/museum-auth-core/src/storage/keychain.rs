//! OS keychain-backed key-value store.
//!
//! The whole map is kept as one JSON secret under a single keychain entry, so
//! a batch is one keychain write.

use std::collections::BTreeMap;
use std::sync::Arc;

use ::keyring::Entry;
use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::{apply_edits, Edit, KeyValueStore};
use crate::error::StorageError;

/// Keychain account name holding the session map
const ACCOUNT_NAME: &str = "session";

pub struct KeyringStore {
    entry: Arc<Entry>,
    // Serializes read-modify-write cycles against the keychain.
    write_lock: Mutex<()>,
    revisions: watch::Sender<u64>,
}

impl KeyringStore {
    pub fn new(service: &str) -> Result<Self, StorageError> {
        Ok(Self::with_entry(Entry::new(service, ACCOUNT_NAME)?))
    }

    fn with_entry(entry: Entry) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            entry: Arc::new(entry),
            write_lock: Mutex::new(()),
            revisions,
        }
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let entry = Arc::clone(&self.entry);
        tokio::task::spawn_blocking(move || read_entry(&entry)).await?
    }
}

fn read_entry(entry: &Entry) -> Result<BTreeMap<String, String>, StorageError> {
    match entry.get_password() {
        Ok(secret) => Ok(serde_json::from_str(&secret)?),
        Err(::keyring::Error::NoEntry) => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_entry(entry: &Entry, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
    if entries.is_empty() {
        match entry.delete_credential() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    } else {
        entry.set_password(&serde_json::to_string(entries)?)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.read_map().await?;
        Ok(entries.remove(key))
    }

    async fn apply(&self, edits: Vec<Edit>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = match self.read_map().await {
            Ok(entries) => entries,
            Err(StorageError::Codec(e)) => {
                warn!(error = %e, "Keychain entry is corrupt and will be replaced");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        apply_edits(&mut entries, edits);

        let entry = Arc::clone(&self.entry);
        let count = entries.len();
        tokio::task::spawn_blocking(move || write_entry(&entry, &entries)).await??;
        debug!(entries = count, "Keychain entry updated");

        self.revisions.send_modify(|revision| *revision += 1);
        Ok(())
    }

    fn revisions(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }
}
