//! Application configuration management.
//!
//! This module handles loading and saving the configuration: identity
//! endpoint, OAuth redirect URI, request timeout and where credentials are
//! kept.
//!
//! Configuration is stored at `~/.config/museum-auth/config.json`; any field
//! can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::HttpAuthClient;
use crate::storage::{EncryptedFileStore, KeyValueStore, KeyringStore, MemoryStore};

/// Application name used for config/data directory paths and the keychain
pub const APP_NAME: &str = "museum-auth";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.enc";

pub const DEFAULT_API_BASE_URL: &str = "https://api.cynxio.com";
pub const DEFAULT_REDIRECT_URI: &str = "museum://callback";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ENV_API_BASE_URL: &str = "MUSEUM_API_BASE_URL";
const ENV_STORAGE: &str = "MUSEUM_STORAGE";
const ENV_STORE_PASSPHRASE: &str = "MUSEUM_STORE_PASSPHRASE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Keyring,
    #[default]
    EncryptedFile,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "encrypted_file" | "file" => Ok(StorageBackend::EncryptedFile),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub redirect_uri: String,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    pub store_passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            store_passphrase: None,
        }
    }
}

impl Config {
    /// Load from the config directory, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = url;
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse()?;
        }
        if let Some(passphrase) = lookup(ENV_STORE_PASSPHRASE) {
            self.store_passphrase = Some(passphrase);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the credential file and logs.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Passphrase for the encrypted file store. Without an explicit one the
    /// key is bound to this user account on this machine.
    fn passphrase(&self) -> String {
        if let Some(ref passphrase) = self.store_passphrase {
            return passphrase.clone();
        }
        let home = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        format!("{}:{}:{}", APP_NAME, user, home)
    }

    /// Open the configured credential backend.
    pub fn key_value_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        let store: Arc<dyn KeyValueStore> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStore::new(APP_NAME)?),
            StorageBackend::EncryptedFile => {
                let path = self.data_dir()?.join(CREDENTIALS_FILE);
                let store = EncryptedFileStore::new(path, self.passphrase());
                debug!(path = %store.path().display(), "Using encrypted credential file");
                Arc::new(store)
            }
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }

    pub fn auth_client(&self) -> Result<HttpAuthClient> {
        HttpAuthClient::with_timeout(self.api_base_url.clone(), self.request_timeout())
            .context("Failed to build HTTP client")
    }
}
