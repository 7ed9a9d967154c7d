//! Session management.
//!
//! This module provides:
//! - `SessionManager`: the single source of truth for the signed-in state,
//!   driven by startup reconciliation, login, logout and silent refresh
//!
//! State is published through a latest-value channel, so late subscribers
//! immediately see the current state.

pub mod manager;
mod state;

pub use manager::SessionManager;
