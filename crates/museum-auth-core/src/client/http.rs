//! `AuthClient` over HTTP against the `/auth0/*` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::AuthClient;
use crate::clock::now_epoch_secs;
use crate::error::AuthError;
use crate::models::{AuthResponse, LoginGrant, TokenGrant, TokenPair};

const LOGIN_PATH: &str = "/auth0/login";
const LOGOUT_PATH: &str = "/auth0/logout";
const REFRESH_PATH: &str = "/auth0/refresh";

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Identity client. Clone is cheap - reqwest::Client shares its pool.
#[derive(Clone)]
pub struct HttpAuthClient {
    client: Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use an existing client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, AuthError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, AuthError> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(&self, auth_code: &str, redirect_uri: &str) -> Result<AuthResponse, AuthError> {
        let url = self.url(LOGIN_PATH);
        debug!(%url, "Exchanging authorization code");

        let response = self
            .client
            .post(&url)
            .query(&[("code", auth_code), ("redirect_uri", redirect_uri)])
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let grant: LoginGrant = Self::parse(response).await?;
        Ok(grant.into_response(now_epoch_secs()))
    }

    async fn logout(&self, access_token: &str) -> bool {
        let url = self.url(LOGOUT_PATH);
        let result = self.client.post(&url).bearer_auth(access_token).send().await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Remote logout rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Remote logout failed");
                false
            }
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let url = self.url(REFRESH_PATH);
        debug!(%url, "Refreshing tokens");

        let response = self
            .client
            .post(&url)
            .bearer_auth(refresh_token)
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let grant: TokenGrant = Self::parse(response).await?;
        Ok(grant.into_pair(now_epoch_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = HttpAuthClient::new("https://api.example.com/").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.url(LOGIN_PATH), "https://api.example.com/auth0/login");
    }
}
