//! Session data model.
//!
//! Wire types mirror the identity provider's JSON (camelCase). Token
//! lifetimes arrive relative (`expiresIn`) and are pinned to an absolute
//! epoch second the moment they are received.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity record returned by the provider. Replaced wholesale on login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "picture", default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
}

/// Token set as the provider sends it, with a relative lifetime.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until expiry, counted from receipt.
    pub expires_in: i64,
}

impl TokenGrant {
    /// Pin the relative lifetime to an absolute instant.
    pub fn into_pair(self, received_at: i64) -> TokenPair {
        TokenPair {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at: received_at.saturating_add(self.expires_in),
        }
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Access/id token pair with an absolute expiry in epoch seconds.
///
/// A missing `refresh_token` means the pair cannot be renewed silently.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    pub access_token: String,
    pub id_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

impl TokenPair {
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

// Secrets stay out of logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Login exchange body as the provider sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginGrant {
    pub user: User,
    pub tokens: TokenGrant,
}

impl LoginGrant {
    pub fn into_response(self, received_at: i64) -> AuthResponse {
        AuthResponse {
            user: self.user,
            tokens: self.tokens.into_pair(received_at),
        }
    }
}

/// A completed login: the user and their freshly issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthResponse {
    pub user: User,
    pub tokens: TokenPair,
}

/// The single authoritative session status consumed by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    Loading,
    Unauthenticated,
    Authenticated(User),
    /// Treated as signed out by the UI, which also shows the message.
    Error(String),
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Loading => write!(f, "loading"),
            SessionState::Unauthenticated => write!(f, "signed out"),
            SessionState::Authenticated(user) => {
                write!(f, "signed in as {} <{}>", user.display_name, user.email)
            }
            SessionState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Outcome of [`crate::SessionManager::login`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginResult {
    pub success: bool,
    pub auth_response: Option<AuthResponse>,
    pub error: Option<String>,
}

impl LoginResult {
    pub fn succeeded(auth_response: AuthResponse) -> Self {
        Self {
            success: true,
            auth_response: Some(auth_response),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            auth_response: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_grant_parses_provider_shape() {
        let body = json!({
            "user": {"id": "1", "email": "a@b.com", "name": "A"},
            "tokens": {"accessToken": "t1", "idToken": "i1", "expiresIn": 3600}
        });
        let grant: LoginGrant = serde_json::from_value(body).unwrap();
        let response = grant.into_response(1_000);

        assert_eq!(response.user.display_name, "A");
        assert_eq!(response.user.picture_url, None);
        assert_eq!(response.tokens.access_token, "t1");
        assert_eq!(response.tokens.refresh_token, None);
        assert_eq!(response.tokens.expires_at, 4_600);
    }

    #[test]
    fn test_grant_expiry_saturates() {
        let grant = TokenGrant {
            access_token: "a".into(),
            id_token: "i".into(),
            refresh_token: None,
            expires_in: i64::MAX,
        };
        assert_eq!(grant.into_pair(10).expires_at, i64::MAX);
    }

    #[test]
    fn test_token_pair_persists_absolute_expiry() {
        let pair = TokenPair {
            access_token: "a".into(),
            id_token: "i".into(),
            refresh_token: Some("r".into()),
            expires_at: 42,
        };
        let value = serde_json::to_value(&pair).unwrap();
        assert_eq!(value["expiresAt"], 42);
        assert_eq!(value["refreshToken"], "r");
        assert!(value.get("expiresIn").is_none());
    }

    #[test]
    fn test_token_pair_debug_hides_secrets() {
        let pair = TokenPair {
            access_token: "super-secret-access".into(),
            id_token: "super-secret-id".into(),
            refresh_token: Some("super-secret-refresh".into()),
            expires_at: 42,
        };
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("expires_at: 42"));
    }

    #[test]
    fn test_session_state_serialization_is_tagged() {
        let user = User {
            id: "1".into(),
            email: "a@b.com".into(),
            display_name: "A".into(),
            picture_url: None,
        };
        let value = serde_json::to_value(SessionState::Authenticated(user)).unwrap();
        assert_eq!(value["state"], "authenticated");
        assert_eq!(value["data"]["id"], "1");

        let value = serde_json::to_value(SessionState::Unauthenticated).unwrap();
        assert_eq!(value, json!({"state": "unauthenticated"}));
    }

    #[test]
    fn test_session_state_user_only_when_authenticated() {
        let user = User {
            id: "1".into(),
            email: "a@b.com".into(),
            display_name: "A".into(),
            picture_url: None,
        };
        assert_eq!(SessionState::Authenticated(user.clone()).user(), Some(&user));
        assert_eq!(SessionState::Loading.user(), None);
        assert_eq!(SessionState::Error("x".into()).user(), None);
    }

    #[test]
    fn test_login_result_constructors() {
        let failed = LoginResult::failed("nope");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("nope"));
        assert!(failed.auth_response.is_none());
    }
}
