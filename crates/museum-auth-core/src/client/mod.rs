//! Identity provider client.
//!
//! The session manager talks to the provider only through [`AuthClient`];
//! [`HttpAuthClient`] is the production implementation. Requests are plain
//! request/response with no retry at this layer.

pub mod http;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::models::{AuthResponse, TokenPair};

pub use http::HttpAuthClient;

#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Exchange an authorization code for a user and token pair.
    async fn login(&self, auth_code: &str, redirect_uri: &str) -> Result<AuthResponse, AuthError>;

    /// Best-effort remote invalidation. Returns false on any failure.
    async fn logout(&self, access_token: &str) -> bool;

    /// Exchange a refresh token for a new pair.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;
}
