//! Core library for the museum app's sign-in.
//!
//! This crate contains the session logic shared by every front end:
//! - `models`: user, token and session state types
//! - `clock`: token validity against the wall clock
//! - `storage`: credential persistence (memory, encrypted file, OS keychain)
//! - `client`: the identity provider client
//! - `session`: the session state machine
//! - `config`: configuration and backend wiring

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod storage;

pub use client::{AuthClient, HttpAuthClient};
pub use config::{Config, StorageBackend};
pub use error::{AuthError, Cancelled, StorageError};
pub use models::{AuthResponse, LoginResult, SessionState, TokenPair, User};
pub use session::SessionManager;
pub use storage::{CredentialStore, KeyValueStore, KvCredentialStore};
