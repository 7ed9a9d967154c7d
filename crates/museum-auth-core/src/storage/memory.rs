use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{apply_edits, Edit, KeyValueStore};
use crate::error::StorageError;

/// Process-local key-value store. Nothing survives a restart.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    revisions: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            revisions,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        // A poisoned lock still holds a consistent map: batches are applied
        // before any code that could panic.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn apply(&self, edits: Vec<Edit>) -> Result<(), StorageError> {
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            apply_edits(&mut entries, edits);
        }
        self.revisions.send_modify(|revision| *revision += 1);
        Ok(())
    }

    fn revisions(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }
}
