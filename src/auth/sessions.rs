//! Bearer sessions issued at sign-in.
//!
//! A session token has the form `<id>.<secret>`. Only the id appears in the
//! store key (`session:<id>`); the secret and the user id are sealed inside
//! the value, so the store contents alone cannot be replayed as a bearer.
//! Entries expire with the store TTL.

use crate::credentials::{session_key, CipherBox, StorageError, TokenStore};
use crate::manager::CredentialError;
use crate::policy::now_seconds;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage TTL for sessions (30 days)
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

#[derive(Serialize, Deserialize)]
struct SessionEntry {
    user_id: String,
    secret: String,
    issued_at: i64,
}

/// Issues, resolves and revokes session tokens.
#[derive(Clone)]
pub struct SessionTokens {
    cipher: Arc<CipherBox>,
    store: Arc<dyn TokenStore>,
    ttl: chrono::Duration,
}

impl SessionTokens {
    pub fn new(cipher: Arc<CipherBox>, store: Arc<dyn TokenStore>, ttl: chrono::Duration) -> Self {
        Self { cipher, store, ttl }
    }

    /// Starts a session for `user_id` and returns its bearer token.
    pub fn issue(&self, user_id: &str) -> Result<String, CredentialError> {
        let id = Uuid::new_v4().simple().to_string();
        let secret = Uuid::new_v4().simple().to_string();

        let entry = SessionEntry {
            user_id: user_id.to_string(),
            secret: secret.clone(),
            issued_at: now_seconds(),
        };
        let blob = self.cipher.seal(&entry).map_err(CredentialError::Seal)?;
        self.store.put(&session_key(&id), &blob, self.ttl)?;

        info!(user_id = %user_id, session_id = %id, "Session issued");
        Ok(format!("{}.{}", id, secret))
    }

    /// Returns the user the token was issued to, or `None` when the token is
    /// unknown, expired, revoked or forged.
    pub fn resolve(&self, token: &str) -> Result<Option<String>, StorageError> {
        let Some((id, secret)) = split_token(token) else {
            return Ok(None);
        };
        let Some(blob) = self.store.get(&session_key(id))? else {
            debug!(session_id = %id, "Unknown or expired session");
            return Ok(None);
        };

        match self.cipher.open::<SessionEntry>(&blob) {
            Ok(entry) if entry.secret == secret => Ok(Some(entry.user_id)),
            Ok(_) => {
                warn!(session_id = %id, "Session secret mismatch");
                Ok(None)
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Stored session could not be opened");
                Ok(None)
            }
        }
    }

    /// Ends the session. Unknown tokens are ignored.
    pub fn revoke(&self, token: &str) -> Result<bool, StorageError> {
        let Some((id, _)) = split_token(token) else {
            return Ok(false);
        };
        self.store.delete(&session_key(id))
    }
}

fn split_token(token: &str) -> Option<(&str, &str)> {
    token
        .split_once('.')
        .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{EncryptionKey, MemoryTokenStore};

    fn sessions(store: Arc<MemoryTokenStore>) -> SessionTokens {
        SessionTokens::new(
            Arc::new(CipherBox::new(&EncryptionKey::generate())),
            store,
            chrono::Duration::days(DEFAULT_SESSION_TTL_DAYS),
        )
    }

    #[test]
    fn test_issued_token_resolves_to_user() {
        let sessions = sessions(Arc::new(MemoryTokenStore::new()));

        let token = sessions.issue("104857").unwrap();
        assert_eq!(sessions.resolve(&token).unwrap(), Some("104857".to_string()));
        assert_eq!(token.len(), 65);
    }

    #[test]
    fn test_user_id_is_not_a_session() {
        let sessions = sessions(Arc::new(MemoryTokenStore::new()));
        sessions.issue("alice@example.com").unwrap();

        assert_eq!(sessions.resolve("alice@example.com").unwrap(), None);
        assert_eq!(sessions.resolve("alice").unwrap(), None);
        assert_eq!(sessions.resolve(".").unwrap(), None);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sessions = sessions(Arc::new(MemoryTokenStore::new()));
        let token = sessions.issue("alice").unwrap();

        let (id, _) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", id, Uuid::new_v4().simple());
        assert_eq!(sessions.resolve(&forged).unwrap(), None);
    }

    #[test]
    fn test_store_contents_do_not_reveal_secret() {
        let store = Arc::new(MemoryTokenStore::new());
        let sessions = sessions(Arc::clone(&store));
        let token = sessions.issue("alice").unwrap();

        let (id, secret) = token.split_once('.').unwrap();
        let blob = store.get(&session_key(id)).unwrap().unwrap();
        let stored = serde_json::to_string(&blob).unwrap();
        assert!(!stored.contains(secret));
        assert!(!stored.contains("alice"));
    }

    #[test]
    fn test_session_from_other_key_rejected() {
        let store = Arc::new(MemoryTokenStore::new());
        let token = sessions(Arc::clone(&store)).issue("alice").unwrap();

        // Same store, different process key
        assert_eq!(sessions(store).resolve(&token).unwrap(), None);
    }

    #[test]
    fn test_revoke() {
        let sessions = sessions(Arc::new(MemoryTokenStore::new()));
        let token = sessions.issue("alice").unwrap();
        let other = sessions.issue("alice").unwrap();

        assert!(sessions.revoke(&token).unwrap());
        assert!(!sessions.revoke(&token).unwrap());
        assert_eq!(sessions.resolve(&token).unwrap(), None);
        assert_eq!(sessions.resolve(&other).unwrap(), Some("alice".to_string()));
        assert!(!sessions.revoke("garbage").unwrap());
    }

    #[test]
    fn test_expired_session_rejected() {
        let sessions = SessionTokens::new(
            Arc::new(CipherBox::new(&EncryptionKey::generate())),
            Arc::new(MemoryTokenStore::new()),
            chrono::Duration::seconds(-1),
        );
        let token = sessions.issue("alice").unwrap();
        assert_eq!(sessions.resolve(&token).unwrap(), None);
    }
}
