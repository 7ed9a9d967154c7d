//! End-to-end session tests: the real HTTP client against a wiremock
//! identity provider, with credentials in an encrypted file.

use std::sync::Arc;

use museum_auth_core::clock::now_epoch_secs;
use museum_auth_core::storage::EncryptedFileStore;
use museum_auth_core::{
    CredentialStore, HttpAuthClient, KvCredentialStore, SessionManager, SessionState, TokenPair,
    User,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_in(dir: &TempDir) -> Arc<KvCredentialStore> {
    let kv = EncryptedFileStore::new(dir.path().join("credentials.enc"), "test-passphrase");
    Arc::new(KvCredentialStore::new(Arc::new(kv)))
}

fn start(server: &MockServer, dir: &TempDir) -> Arc<SessionManager> {
    let client = Arc::new(HttpAuthClient::new(server.uri()).unwrap());
    SessionManager::start(client, store_in(dir))
}

fn user() -> User {
    User {
        id: "1".into(),
        email: "a@b.com".into(),
        display_name: "A".into(),
        picture_url: None,
    }
}

#[tokio::test]
async fn test_login_then_restart_restores_session_offline() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/auth0/login"))
        .and(query_param("code", "abc"))
        .and(query_param("redirect_uri", "app://cb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": "1", "email": "a@b.com", "name": "A"},
            "tokens": {"accessToken": "t1", "idToken": "i1", "expiresIn": 3600}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth0/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let manager = start(&server, &dir);
    assert_eq!(manager.wait_until_settled().await, SessionState::Unauthenticated);

    let result = manager.login("abc", "app://cb").await.unwrap();
    assert!(result.success);
    assert_eq!(manager.state(), SessionState::Authenticated(user()));

    let stored = manager.get_current_tokens().await.unwrap();
    assert_eq!(stored.access_token, "t1");
    assert_eq!(stored.id_token, "i1");
    drop(manager);

    // A fresh process reads the same file and needs no network.
    let restarted = start(&server, &dir);
    assert_eq!(
        restarted.wait_until_settled().await,
        SessionState::Authenticated(user())
    );
    assert_eq!(restarted.get_current_user().await, Some(user()));
}

#[tokio::test]
async fn test_restart_with_expired_tokens_refreshes() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let expired = TokenPair {
        access_token: "t1".into(),
        id_token: "i1".into(),
        refresh_token: Some("r1".into()),
        expires_at: now_epoch_secs() - 60,
    };
    store_in(&dir).save(&user(), &expired).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth0/refresh"))
        .and(header("authorization", "Bearer r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "t2",
            "idToken": "i2",
            "refreshToken": "r2",
            "expiresIn": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = start(&server, &dir);
    assert_eq!(manager.wait_until_settled().await, SessionState::Authenticated(user()));

    let tokens = store_in(&dir).load_tokens().await.unwrap();
    assert_eq!(tokens.access_token, "t2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_restart_with_revoked_refresh_signs_out() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let expired = TokenPair {
        access_token: "t1".into(),
        id_token: "i1".into(),
        refresh_token: Some("r1".into()),
        expires_at: now_epoch_secs() - 60,
    };
    store_in(&dir).save(&user(), &expired).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth0/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let manager = start(&server, &dir);
    assert_eq!(manager.wait_until_settled().await, SessionState::Unauthenticated);
    assert!(store_in(&dir).load_user().await.is_none());
    assert!(store_in(&dir).load_tokens().await.is_none());
}

#[tokio::test]
async fn test_logout_with_provider_down_still_signs_out() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let valid = TokenPair {
        access_token: "t1".into(),
        id_token: "i1".into(),
        refresh_token: None,
        expires_at: now_epoch_secs() + 3600,
    };
    store_in(&dir).save(&user(), &valid).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth0/logout"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let manager = start(&server, &dir);
    assert_eq!(manager.wait_until_settled().await, SessionState::Authenticated(user()));

    assert!(!manager.logout().await.unwrap());
    assert_eq!(manager.state(), SessionState::Unauthenticated);
    assert!(store_in(&dir).load_tokens().await.is_none());
}
