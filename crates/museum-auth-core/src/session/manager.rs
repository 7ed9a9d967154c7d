//! The session state machine.
//!
//! `SessionManager` reconciles persisted credentials, token expiry and the
//! identity provider into one observable [`SessionState`]. Every operation
//! that mutates the session or the persisted pair runs under a single async
//! mutex, so one transition finishes, terminal state included, before the
//! next begins. Ordinary failures end up in `SessionState::Error`, a failed
//! [`LoginResult`] or a `false` return; cancellation comes back as
//! [`Cancelled`].

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{StateCell, Transition, INITIAL_TICKET};
use crate::client::AuthClient;
use crate::clock;
use crate::error::{AuthError, Cancelled, StorageError};
use crate::models::{AuthResponse, LoginResult, SessionState, TokenPair, User};
use crate::storage::CredentialStore;

pub struct SessionManager {
    client: Arc<dyn AuthClient>,
    store: Arc<dyn CredentialStore>,
    state: StateCell,
    transitions: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl SessionManager {
    /// Build the manager and start reconciling persisted credentials in the
    /// background. Must be called from within a Tokio runtime.
    pub fn start(client: Arc<dyn AuthClient>, store: Arc<dyn CredentialStore>) -> Arc<Self> {
        Self::start_with_cancellation(client, store, &CancellationToken::new())
    }

    /// Like [`SessionManager::start`], with in-flight operations cancelled
    /// when `parent` is.
    pub fn start_with_cancellation(
        client: Arc<dyn AuthClient>,
        store: Arc<dyn CredentialStore>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            client,
            store,
            state: StateCell::new(),
            transitions: Arc::new(Mutex::new(())),
            cancel: parent.child_token(),
        });

        // Take the lock before spawning so reconciliation is always the first
        // transition, whatever the caller does next.
        let lock = Arc::clone(&manager.transitions).try_lock_owned();
        let task = Arc::clone(&manager);
        tokio::spawn(async move {
            // Nothing else can hold a mutex created a moment ago.
            let _lock = match lock {
                Ok(lock) => lock,
                Err(_) => Arc::clone(&task.transitions).lock_owned().await,
            };
            let transition = Transition::resume(&task.state, INITIAL_TICKET);
            if task.reconcile(transition).await.is_err() {
                debug!("Initial reconciliation cancelled");
            }
        });

        manager
    }

    // ===== Observation =====

    /// Latest committed state. Never blocks.
    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Receiver that starts with the current state and sees every later one.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait for the first state that is not `Loading`.
    pub async fn wait_until_settled(&self) -> SessionState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Whether both halves of the credential pair are persisted.
    pub fn is_logged_in(&self) -> BoxStream<'static, bool> {
        self.store.observe_logged_in()
    }

    /// Persisted user, independent of the cached session state.
    pub async fn get_current_user(&self) -> Option<User> {
        self.store.load_user().await
    }

    /// Persisted tokens, for callers building outgoing requests.
    pub async fn get_current_tokens(&self) -> Option<TokenPair> {
        self.store.load_tokens().await
    }

    // ===== Lifecycle =====

    /// Cancel every in-flight operation. Later operations fail fast with
    /// [`Cancelled`], except `logout`, which still signs out locally.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn guarded<F: Future>(&self, future: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }

    // ===== Transitions =====

    /// Derive the session from persisted credentials, refreshing expired
    /// tokens when possible. Runs once on start; may be called again.
    pub async fn initialize(&self) -> Result<(), Cancelled> {
        let transition = self.state.begin();
        let _lock = self.guarded(self.transitions.lock()).await?;
        self.reconcile(transition).await
    }

    async fn reconcile(&self, transition: Transition<'_>) -> Result<(), Cancelled> {
        let state = match self.guarded(self.reconciled_state()).await? {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Session reconciliation failed");
                SessionState::Error(format!("Failed to initialize auth: {e}"))
            }
        };
        transition.commit(state);
        Ok(())
    }

    async fn reconciled_state(&self) -> Result<SessionState, StorageError> {
        let user = self.store.load_user().await;
        let tokens = self.store.load_tokens().await;

        let (user, tokens) = match (user, tokens) {
            (Some(user), Some(tokens)) => (user, tokens),
            _ => {
                debug!("No stored session");
                return Ok(SessionState::Unauthenticated);
            }
        };

        if clock::is_valid(&tokens) {
            debug!(user_id = %user.id, "Stored session is valid");
            return Ok(SessionState::Authenticated(user));
        }

        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            info!(user_id = %user.id, "Stored session expired and cannot be refreshed");
            self.store.clear().await?;
            return Ok(SessionState::Unauthenticated);
        };

        match self.refresh_and_persist(&user, refresh_token).await {
            Ok(_) => {
                info!(user_id = %user.id, "Expired session refreshed");
                Ok(SessionState::Authenticated(user))
            }
            Err(e) => {
                info!(user_id = %user.id, error = %e, "Session refresh failed, signing out");
                self.store.clear().await?;
                Ok(SessionState::Unauthenticated)
            }
        }
    }

    /// Exchange an authorization code for a session.
    ///
    /// `Loading` is published before the first await. A failure leaves the
    /// session in `Error`; the previous session is not restored.
    pub async fn login(&self, auth_code: &str, redirect_uri: &str) -> Result<LoginResult, Cancelled> {
        let transition = self.state.begin();
        let _lock = self.guarded(self.transitions.lock()).await?;

        match self.guarded(self.exchange(auth_code, redirect_uri)).await? {
            Ok(response) => {
                info!(user_id = %response.user.id, "Logged in");
                transition.commit(SessionState::Authenticated(response.user.clone()));
                Ok(LoginResult::succeeded(response))
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                transition.commit(SessionState::Error(format!("Login failed: {e}")));
                Ok(LoginResult::failed(e.to_string()))
            }
        }
    }

    async fn exchange(&self, auth_code: &str, redirect_uri: &str) -> Result<AuthResponse, AuthError> {
        let response = self.client.login(auth_code, redirect_uri).await?;
        self.store.save(&response.user, &response.tokens).await?;
        Ok(response)
    }

    /// Sign out. Local credentials are always cleared and the session always
    /// ends `Unauthenticated`, whatever the provider says.
    ///
    /// Returns whether remote invalidation succeeded, or `true` when there
    /// were no tokens to invalidate. Cancellation only skips the remote call.
    pub async fn logout(&self) -> Result<bool, Cancelled> {
        let transition = self.state.begin();
        // Not guarded: every guarded holder gives the lock up on cancel.
        let _lock = self.transitions.lock().await;

        let mut remote_ok = true;
        let mut cancelled = false;

        if let Some(tokens) = self.store.load_tokens().await {
            match self.guarded(self.client.logout(&tokens.access_token)).await {
                Ok(ok) => remote_ok = ok,
                Err(Cancelled) => cancelled = true,
            }
        }

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear stored credentials on logout");
            remote_ok = false;
        }
        transition.commit(SessionState::Unauthenticated);
        info!(remote_ok, "Logged out");

        if cancelled {
            Err(Cancelled)
        } else {
            Ok(remote_ok)
        }
    }

    /// Renew the stored tokens without touching the session state.
    ///
    /// Returns `false` when there is no user or refresh token, or when the
    /// refresh fails; persisted credentials are left as they were.
    pub async fn refresh_access_token(&self) -> Result<bool, Cancelled> {
        let _lock = self.guarded(self.transitions.lock()).await?;

        let tokens = self.guarded(self.store.load_tokens()).await?;
        let user = self.guarded(self.store.load_user()).await?;

        let (Some(user), Some(refresh_token)) = (user, tokens.and_then(|t| t.refresh_token)) else {
            debug!("Silent refresh skipped, no user or refresh token");
            return Ok(false);
        };

        match self.guarded(self.refresh_and_persist(&user, &refresh_token)).await? {
            Ok(tokens) => {
                debug!(expires_at = tokens.expires_at, "Access token refreshed");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Silent token refresh failed");
                Ok(false)
            }
        }
    }

    async fn refresh_and_persist(&self, user: &User, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let tokens = self.client.refresh_token(refresh_token).await?;
        self.store.save(user, &tokens).await?;
        Ok(tokens)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
