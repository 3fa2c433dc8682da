use std::collections::BTreeMap;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::session::User;
use crate::storage::KeyValueStore;

pub const MIN_PASSWORD_LEN: usize = 6;
const ACCOUNTS_KEY: &str = "accounts";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("password must be at least {} characters", MIN_PASSWORD_LEN)]
    WeakPassword,
    #[error("an account already exists for {0}")]
    EmailInUse(String),
    #[error("no account found for {0}")]
    UserNotFound(String),
    #[error("wrong password")]
    WrongPassword,
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("account storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    /// Message suitable for showing to the person signing in.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidEmail(_) => "That email address doesn't look right.".to_string(),
            AuthError::WeakPassword => {
                format!("Password should be at least {MIN_PASSWORD_LEN} characters.")
            }
            AuthError::EmailInUse(_) => "An account with this email already exists.".to_string(),
            AuthError::UserNotFound(_) => "No account found with this email.".to_string(),
            AuthError::WrongPassword => "Incorrect password. Please try again.".to_string(),
            AuthError::Provider(_) => "Sign-in failed. Please try again.".to_string(),
            AuthError::Storage(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Identity asserted by an external provider (OAuth-style sign-in).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedCredential {
    pub provider: String,
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

pub trait Authenticator {
    fn register(&self, email: &str, password: &str) -> Result<User, AuthError>;
    fn login(&self, email: &str, password: &str) -> Result<User, AuthError>;
    fn logout(&self) -> Result<(), AuthError>;
    fn federated_sign_in(&self, credential: &FederatedCredential) -> Result<User, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    id: String,
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password_hash: Option<String>,
}

impl Account {
    fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

/// Account registry kept in the same key-value store as the todo data.
pub struct LocalAuthenticator {
    store: Arc<dyn KeyValueStore>,
    email_re: Regex,
}

impl LocalAuthenticator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let email_re = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")?;
        Ok(Self { store, email_re })
    }

    fn normalize_email(&self, email: &str) -> Result<String, AuthError> {
        let email = email.trim().to_lowercase();
        if !self.email_re.is_match(&email) {
            return Err(AuthError::InvalidEmail(email));
        }
        Ok(email)
    }

    fn load_accounts(&self) -> Result<BTreeMap<String, Account>, AuthError> {
        let Some(raw) = self.store.get(ACCOUNTS_KEY)? else {
            return Ok(BTreeMap::new());
        };
        let accounts = serde_json::from_str(&raw).map_err(anyhow::Error::from)?;
        Ok(accounts)
    }

    fn save_accounts(&self, accounts: &BTreeMap<String, Account>) -> Result<(), AuthError> {
        let payload = serde_json::to_string(accounts).map_err(anyhow::Error::from)?;
        self.store.set(ACCOUNTS_KEY, &payload)?;
        Ok(())
    }
}

impl Authenticator for LocalAuthenticator {
    #[instrument(skip(self, password))]
    fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = self.normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let mut accounts = self.load_accounts()?;
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailInUse(email));
        }

        let account = Account {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            name: None,
            photo_url: None,
            password_hash: Some(hash_password(password)?),
        };
        let user = account.to_user();
        accounts.insert(email, account);
        self.save_accounts(&accounts)?;

        info!(user_id = %user.id, "registered account");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = self.normalize_email(email)?;
        let accounts = self.load_accounts()?;
        let account = accounts
            .get(&email)
            .ok_or_else(|| AuthError::UserNotFound(email.clone()))?;

        // Federated-only accounts have no password to check.
        let Some(stored) = account.password_hash.as_deref() else {
            return Err(AuthError::WrongPassword);
        };
        if !verify_password(password, stored)? {
            return Err(AuthError::WrongPassword);
        }

        debug!(user_id = %account.id, "password verified");
        Ok(account.to_user())
    }

    fn logout(&self) -> Result<(), AuthError> {
        Ok(())
    }

    #[instrument(skip(self, credential), fields(provider = %credential.provider))]
    fn federated_sign_in(&self, credential: &FederatedCredential) -> Result<User, AuthError> {
        if credential.provider.trim().is_empty() || credential.subject.trim().is_empty() {
            return Err(AuthError::Provider(
                "provider and subject are required".to_string(),
            ));
        }
        let email = self.normalize_email(&credential.email)?;
        let id = format!("{}:{}", credential.provider.trim(), credential.subject.trim());
        let record_key = format!("federated:{id}");

        let mut accounts = self.load_accounts()?;
        let account = Account {
            id,
            email,
            name: credential.name.clone(),
            photo_url: credential.photo_url.clone(),
            password_hash: None,
        };
        let user = account.to_user();
        accounts.insert(record_key, account);
        self.save_accounts(&accounts)?;

        info!(user_id = %user.id, "federated sign-in");
        Ok(user)
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| AuthError::Provider(err.to_string()))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored).map_err(|err| AuthError::Provider(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn authenticator() -> LocalAuthenticator {
        LocalAuthenticator::new(Arc::new(MemoryStore::new())).expect("authenticator")
    }

    #[test]
    fn register_then_login() {
        let auth = authenticator();
        let registered = auth
            .register("Ada@Example.com", "hunter22")
            .expect("register");
        assert_eq!(registered.email, "ada@example.com");

        let logged_in = auth.login("ada@example.com", "hunter22").expect("login");
        assert_eq!(logged_in.id, registered.id);
    }

    #[test]
    fn rejects_bad_input() {
        let auth = authenticator();
        assert!(matches!(
            auth.register("not-an-email", "hunter22"),
            Err(AuthError::InvalidEmail(_))
        ));
        assert!(matches!(
            auth.register("a@b.co", "123"),
            Err(AuthError::WeakPassword)
        ));
        auth.register("a@b.co", "hunter22").expect("register");
        assert!(matches!(
            auth.register("a@b.co", "hunter22"),
            Err(AuthError::EmailInUse(_))
        ));
        assert!(matches!(
            auth.login("a@b.co", "wrong-pass"),
            Err(AuthError::WrongPassword)
        ));
        assert!(matches!(
            auth.login("nobody@b.co", "hunter22"),
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[test]
    fn federated_users_are_namespaced_by_provider() {
        let auth = authenticator();
        let user = auth
            .federated_sign_in(&FederatedCredential {
                provider: "google".to_string(),
                subject: "1234".to_string(),
                email: "g@example.com".to_string(),
                name: Some("G".to_string()),
                photo_url: None,
            })
            .expect("sign in");
        assert_eq!(user.id, "google:1234");
        assert_eq!(user.name.as_deref(), Some("G"));
    }

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            AuthError::WrongPassword.user_message(),
            "Incorrect password. Please try again."
        );
        assert!(AuthError::WeakPassword.user_message().contains('6'));
    }
}
