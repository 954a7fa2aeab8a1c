//! In-memory account store: registration and password verification.
//!
//! Passwords are stored as a random 16-byte salt plus
//! `SHA-256(salt || password)`. A successful `verify` returns a session
//! token from the configured [`TokenService`].

use murmur_core::{SessionToken, TokenService};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

const SALT_LEN: usize = 16;

/// Registration and login failures. Display text is sent to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("username+password required")]
    MissingFields,

    #[error("user exists")]
    Exists,

    #[error("invalid")]
    InvalidCredentials,
}

#[derive(Debug, Clone)]
struct Account {
    id: u64,
    salt: [u8; SALT_LEN],
    password_hash: [u8; 32],
}

/// Username → account map.
pub struct AccountStore {
    users: RwLock<HashMap<String, Account>>,
    tokens: Arc<dyn TokenService>,
    token_ttl: u64,
}

impl AccountStore {
    pub fn new(tokens: Arc<dyn TokenService>, token_ttl: u64) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            tokens,
            token_ttl,
        }
    }

    pub fn token_ttl(&self) -> u64 {
        self.token_ttl
    }

    /// Create an account. Empty username or password is rejected.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), AccountError> {
        if username.is_empty() || password.is_empty() {
            return Err(AccountError::MissingFields);
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let password_hash = hash_password(&salt, password);

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            debug!(username = %username, "registration refused, user exists");
            return Err(AccountError::Exists);
        }
        let id = users.len() as u64 + 1;
        users.insert(
            username.to_string(),
            Account {
                id,
                salt,
                password_hash,
            },
        );
        info!(username = %username, id, "account registered");
        Ok(())
    }

    /// Check credentials and issue a session token.
    pub async fn verify(&self, username: &str, password: &str) -> Result<SessionToken, AccountError> {
        let account = self
            .users
            .read()
            .await
            .get(username)
            .cloned()
            .ok_or(AccountError::InvalidCredentials)?;

        let candidate = hash_password(&account.salt, password);
        if !bool::from(candidate[..].ct_eq(&account.password_hash[..])) {
            return Err(AccountError::InvalidCredentials);
        }

        debug!(username = %username, id = account.id, "credentials verified");
        Ok(self.tokens.issue_for(username, self.token_ttl))
    }

}

fn hash_password(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{generate_secret, HmacTokenService};

    fn store() -> (Arc<HmacTokenService>, AccountStore) {
        let tokens = Arc::new(HmacTokenService::new(&generate_secret().unwrap()));
        let store = AccountStore::new(tokens.clone(), 60);
        (tokens, store)
    }

    #[tokio::test]
    async fn register_then_login() {
        let (tokens, store) = store();
        store.register("alice", "hunter2").await.unwrap();
        let token = store.verify("alice", "hunter2").await.unwrap();
        assert_eq!(tokens.validate(token.as_str()).unwrap().username, "alice");
    }

    #[tokio::test]
    async fn duplicate_registration() {
        let (_, store) = store();
        store.register("alice", "a").await.unwrap();
        assert_eq!(store.register("alice", "b").await, Err(AccountError::Exists));
        assert!(store.verify("alice", "a").await.is_ok());
        assert_eq!(
            store.verify("alice", "b").await.unwrap_err(),
            AccountError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn missing_fields() {
        let (_, store) = store();
        assert_eq!(store.register("", "pw").await, Err(AccountError::MissingFields));
        assert_eq!(store.register("alice", "").await, Err(AccountError::MissingFields));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user() {
        let (_, store) = store();
        store.register("alice", "right").await.unwrap();
        assert_eq!(
            store.verify("alice", "wrong").await.unwrap_err(),
            AccountError::InvalidCredentials
        );
        assert_eq!(
            store.verify("bob", "right").await.unwrap_err(),
            AccountError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn hash_differing_in_last_byte_is_rejected() {
        let (_, store) = store();
        store.register("alice", "pw").await.unwrap();
        {
            let mut users = store.users.write().await;
            let account = users.get_mut("alice").unwrap();
            account.password_hash[31] ^= 0x01;
        }
        assert_eq!(
            store.verify("alice", "pw").await.unwrap_err(),
            AccountError::InvalidCredentials
        );
    }

    #[test]
    fn salts_differ_hashes() {
        let a = hash_password(&[1u8; SALT_LEN], "pw");
        let b = hash_password(&[2u8; SALT_LEN], "pw");
        assert_ne!(a, b);
    }
}
