//! Session state shared by the stores.
//!
//! `SessionContext` is the single owner of the current identity. Stores
//! never read it directly; they subscribe and receive `AuthState`
//! snapshots on every transition, and derive their `StorageKey` from them.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Authenticator, FederatedCredential};
use crate::storage::KeyValueStore;

const SESSION_KEY: &str = "session:current";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl User {
    /// Name to greet the user with: profile name, else the email's local part.
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name;
        }
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

/// Per-user storage namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    user_id: String,
}

impl StorageKey {
    pub fn for_user(user: Option<&User>) -> Option<Self> {
        user.map(|u| Self {
            user_id: u.id.clone(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn todos(&self) -> String {
        format!("todos:{}", self.user_id)
    }

    pub fn lists(&self) -> String {
        format!("lists:{}", self.user_id)
    }

    pub fn selected_list(&self) -> String {
        format!("selected:{}", self.user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub loading: bool,
}

impl AuthState {
    /// No key exists while signed out or while a session change is resolving.
    pub fn storage_key(&self) -> Option<StorageKey> {
        if self.loading {
            return None;
        }
        StorageKey::for_user(self.user.as_ref())
    }
}

/// Receiving end of a `SessionContext` subscription.
#[derive(Debug)]
pub struct SessionWatch {
    rx: Receiver<AuthState>,
}

impl SessionWatch {
    /// Snapshots delivered since the last call, oldest first.
    pub fn pending(&self) -> Vec<AuthState> {
        self.rx.try_iter().collect()
    }
}

pub struct SessionContext {
    state: AuthState,
    watchers: Vec<Sender<AuthState>>,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &self.state)
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Starts signed out.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: AuthState::default(),
            watchers: vec![],
            store,
        }
    }

    /// Starts with whatever user was persisted by a previous sign-in.
    #[tracing::instrument(skip(store))]
    pub fn restore(store: Arc<dyn KeyValueStore>) -> Self {
        let user = match store.get(SESSION_KEY) {
            Ok(Some(raw)) if !raw.trim().is_empty() && raw.trim() != "null" => {
                match serde_json::from_str::<User>(&raw) {
                    Ok(user) => Some(user),
                    Err(err) => {
                        warn!(error = %err, "stored session unreadable; starting signed out");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "failed reading session; starting signed out");
                None
            }
        };
        debug!(signed_in = user.is_some(), "restored session");

        Self {
            state: AuthState {
                user,
                loading: false,
            },
            watchers: vec![],
            store,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn user(&self) -> Option<&User> {
        self.state.user.as_ref()
    }

    /// New watchers immediately receive the current state.
    pub fn subscribe(&mut self) -> SessionWatch {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(self.state.clone());
        self.watchers.push(tx);
        SessionWatch { rx }
    }

    pub fn register(
        &mut self,
        auth: &dyn Authenticator,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        self.run_auth("register", || auth.register(email, password), |u| {
            Some(u.clone())
        })
    }

    pub fn login(
        &mut self,
        auth: &dyn Authenticator,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        self.run_auth("login", || auth.login(email, password), |u| {
            Some(u.clone())
        })
    }

    pub fn federated_sign_in(
        &mut self,
        auth: &dyn Authenticator,
        credential: &FederatedCredential,
    ) -> Result<User, AuthError> {
        self.run_auth("federated_sign_in", || auth.federated_sign_in(credential), |u| {
            Some(u.clone())
        })
    }

    pub fn logout(&mut self, auth: &dyn Authenticator) -> Result<(), AuthError> {
        self.run_auth("logout", || auth.logout(), |_| None)
    }

    /// Brackets a provider call with the loading flag. The identity only
    /// changes when the call succeeds.
    #[tracing::instrument(skip(self, call, identity))]
    fn run_auth<T>(
        &mut self,
        action: &'static str,
        call: impl FnOnce() -> Result<T, AuthError>,
        identity: impl FnOnce(&T) -> Option<User>,
    ) -> Result<T, AuthError> {
        self.state.loading = true;
        self.notify();

        let outcome = call();
        match &outcome {
            Ok(value) => {
                self.state.user = identity(value);
                self.persist_session();
                info!(
                    user_id = self.state.user.as_ref().map(|u| u.id.as_str()).unwrap_or("-"),
                    "session changed"
                );
            }
            Err(err) => warn!(error = %err, "authentication failed; session unchanged"),
        }

        self.state.loading = false;
        self.notify();
        outcome
    }

    fn persist_session(&self) {
        let payload = match &self.state.user {
            Some(user) => match serde_json::to_string(user) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize session");
                    return;
                }
            },
            None => "null".to_string(),
        };
        if let Err(err) = self.store.set(SESSION_KEY, &payload) {
            warn!(error = %err, "failed to persist session");
        }
    }

    fn notify(&mut self) {
        let snapshot = self.state.clone();
        self.watchers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        debug!(watchers = self.watchers.len(), loading = snapshot.loading, "notified session watchers");
    }
}
