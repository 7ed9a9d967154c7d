//! Credential persistence.
//!
//! This module provides:
//! - `KeyValueStore`: the platform key-value collaborator (string keys and
//!   values, atomic batches, change notifications)
//! - `CredentialStore`: the user + token pair contract the session manager
//!   depends on, and `KvCredentialStore`, its implementation on any
//!   `KeyValueStore`
//! - Backends: in-memory, encrypted file, and OS keychain

pub mod encrypted_file;
pub mod keychain;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::models::{TokenPair, User};

pub use encrypted_file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Key holding the JSON-encoded [`User`]
pub const USER_KEY: &str = "auth_user";

/// Key holding the JSON-encoded [`TokenPair`]
pub const TOKENS_KEY: &str = "auth_tokens";

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Set(String, String),
    Remove(String),
}

/// Platform key-value persistence.
///
/// `apply` must be atomic: a concurrent `get` observes either none or all of
/// a batch. `revisions` is a latest-value channel bumped after every applied
/// batch.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn apply(&self, edits: Vec<Edit>) -> Result<(), StorageError>;

    fn revisions(&self) -> watch::Receiver<u64>;
}

/// Apply a batch to an in-memory map. Shared by every backend so they agree
/// on batch semantics.
pub(crate) fn apply_edits(map: &mut BTreeMap<String, String>, edits: Vec<Edit>) {
    for edit in edits {
        match edit {
            Edit::Set(key, value) => {
                map.insert(key, value);
            }
            Edit::Remove(key) => {
                map.remove(&key);
            }
        }
    }
}

/// The persisted user + token pair.
///
/// The two are always written and cleared together. Reads never fail:
/// missing and corrupt data both come back as `None`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, user: &User, tokens: &TokenPair) -> Result<(), StorageError>;

    async fn load_user(&self) -> Option<User>;

    async fn load_tokens(&self) -> Option<TokenPair>;

    async fn clear(&self) -> Result<(), StorageError>;

    /// Whether both halves are present, re-evaluated after every mutation.
    /// Each call returns an independent stream that starts with the
    /// current value.
    fn observe_logged_in(&self) -> BoxStream<'static, bool>;
}

/// [`CredentialStore`] over a [`KeyValueStore`], using two JSON entries.
#[derive(Clone)]
pub struct KvCredentialStore {
    kv: Arc<dyn KeyValueStore>,
}

impl KvCredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read stored credentials");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Stored credentials are corrupt, ignoring");
                None
            }
        }
    }
}

async fn both_present(kv: &dyn KeyValueStore) -> bool {
    matches!(
        (kv.get(USER_KEY).await, kv.get(TOKENS_KEY).await),
        (Ok(Some(_)), Ok(Some(_)))
    )
}

#[async_trait]
impl CredentialStore for KvCredentialStore {
    async fn save(&self, user: &User, tokens: &TokenPair) -> Result<(), StorageError> {
        let edits = vec![
            Edit::Set(USER_KEY.to_string(), serde_json::to_string(user)?),
            Edit::Set(TOKENS_KEY.to_string(), serde_json::to_string(tokens)?),
        ];
        self.kv.apply(edits).await?;
        debug!(user_id = %user.id, expires_at = tokens.expires_at, "Credentials saved");
        Ok(())
    }

    async fn load_user(&self) -> Option<User> {
        self.load(USER_KEY).await
    }

    async fn load_tokens(&self) -> Option<TokenPair> {
        self.load(TOKENS_KEY).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let edits = vec![
            Edit::Remove(USER_KEY.to_string()),
            Edit::Remove(TOKENS_KEY.to_string()),
        ];
        self.kv.apply(edits).await?;
        debug!("Credentials cleared");
        Ok(())
    }

    fn observe_logged_in(&self) -> BoxStream<'static, bool> {
        let kv = Arc::clone(&self.kv);
        let mut revisions = kv.revisions();
        revisions.mark_changed();

        stream::unfold((kv, revisions), |(kv, mut revisions)| async move {
            // The sender lives inside the backend we hold, so this only ends
            // if the backend itself is torn down.
            revisions.changed().await.ok()?;
            let present = both_present(kv.as_ref()).await;
            Some((present, (kv, revisions)))
        })
        .boxed()
    }
}
