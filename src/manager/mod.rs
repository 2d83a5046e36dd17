//! Credential manager - keeps a valid access token available per user.
//!
//! # Lifecycle
//!
//! ```text
//! Absent ──store_initial_token──▶ Valid ──(within buffer)──▶ ExpiringSoon
//!                                   ▲                             │
//!                                   │ success               refresh token?
//!                                   │                             ▼
//!                                   └────────────────────── Refreshing
//!                                                                 │ failure
//!                                                                 ▼
//!                                                   Failed (credential deleted)
//! ```
//!
//! # Single-flight
//!
//! Refreshes are serialized per user with a lock keyed by `user_id`. A caller
//! that waited on the lock re-reads the store before calling the provider. If
//! the record it saw before queuing was replaced meanwhile, it takes the
//! replacement as the outcome of the refresh that just finished, even when
//! the provider issued a lifetime shorter than the safety buffer. Different
//! users never contend.
//!
//! Every failure collapses to one of two caller outcomes: a token, or `None`
//! meaning "re-authenticate". Only storage failures are returned as errors.

use crate::credentials::{
    token_key, CipherBox, CipherError, StorageError, TokenRecord, TokenStore,
};
use crate::oauth::{ProviderError, TokenRefresher};
use crate::policy::{now_seconds, ExpiryPolicy};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


/// Storage TTL for token entries (30 days)
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Upper bound on a single provider refresh call
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures the caller must see (everything else means "re-authenticate").
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to seal credential: {0}")]
    Seal(#[source] CipherError),
}

/// Observable state of a user's credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Absent,
    Valid,
    ExpiringSoon,
    Refreshing,
    Failed,
}

/// An access token that is valid beyond the safety buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidToken {
    pub access_token: String,
    pub expires_at: i64,
}

impl From<&TokenRecord> for ValidToken {
    fn from(record: &TokenRecord) -> Self {
        Self {
            access_token: record.access_token.clone(),
            expires_at: record.expires_at,
        }
    }
}

/// Tunables for [`CredentialManager`].
#[derive(Clone, Debug)]
pub struct ManagerSettings {
    pub policy: ExpiryPolicy,
    pub token_ttl: chrono::Duration,
    pub refresh_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            policy: ExpiryPolicy::default(),
            token_ttl: chrono::Duration::days(DEFAULT_TOKEN_TTL_DAYS),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

/// Orchestrates token store, cipher, refresh client and expiry policy.
///
/// Safe to share behind an `Arc` and call concurrently for the same user.
pub struct CredentialManager {
    cipher: Arc<CipherBox>,
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    settings: ManagerSettings,
    /// Per-user refresh locks, removed once no caller holds them
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Users whose last refresh failed (Unix seconds of failure). Markers
    /// lapse after the token storage TTL.
    failed: DashMap<String, i64>,
}

impl CredentialManager {
    pub fn new(
        cipher: Arc<CipherBox>,
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            cipher,
            store,
            refresher,
            settings,
            refresh_locks: DashMap::new(),
            failed: DashMap::new(),
        }
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.settings.policy
    }

    /// Stores the record obtained at sign-in, replacing any existing one.
    pub async fn store_initial_token(
        &self,
        user_id: &str,
        record: &TokenRecord,
    ) -> Result<(), CredentialError> {
        let lock = self.lock_for(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.persist(user_id, record)
        };
        drop(lock);
        self.release_lock(user_id);

        result?;
        self.failed.remove(user_id);

        info!(
            user_id = %user_id,
            expires_at = record.expires_at,
            has_refresh_token = record.refresh_token.is_some(),
            "Stored initial credential"
        );
        Ok(())
    }

    /// Returns a usable access token, refreshing it first if needed.
    ///
    /// `Ok(None)` means the user must re-authenticate.
    pub async fn get_valid_access_token(
        &self,
        user_id: &str,
    ) -> Result<Option<String>, CredentialError> {
        Ok(self
            .valid_token(user_id)
            .await?
            .map(|token| token.access_token))
    }

    /// Like [`Self::get_valid_access_token`] but also reports the expiry.
    pub async fn valid_token(&self, user_id: &str) -> Result<Option<ValidToken>, CredentialError> {
        let Some(record) = self.load(user_id)? else {
            debug!(user_id = %user_id, "No credential stored");
            return Ok(None);
        };

        if !self.settings.policy.is_expired(record.expires_at, now_seconds()) {
            return Ok(Some(ValidToken::from(&record)));
        }

        if record.refresh_token.is_none() {
            warn!(
                user_id = %user_id,
                "Access token expired and no refresh token available"
            );
            return Ok(None);
        }

        let lock = self.lock_for(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(user_id, &record).await
        };
        drop(lock);
        self.release_lock(user_id);

        result
    }

    /// Deletes the stored credential. Safe to call repeatedly.
    pub async fn clear(&self, user_id: &str) -> Result<bool, CredentialError> {
        let lock = self.lock_for(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(&token_key(user_id))
        };
        drop(lock);
        self.release_lock(user_id);

        let deleted = result?;
        self.failed.remove(user_id);

        info!(user_id = %user_id, deleted, "Credential cleared");
        Ok(deleted)
    }

    /// Current lifecycle state of the user's credential.
    ///
    /// `Refreshing` is reported whenever the user's lock is held, which also
    /// covers a `clear` or `store_initial_token` in progress.
    pub fn state(&self, user_id: &str) -> Result<CredentialState, CredentialError> {
        let refreshing = self
            .refresh_locks
            .get(user_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false);
        if refreshing {
            return Ok(CredentialState::Refreshing);
        }

        match self.load(user_id)? {
            Some(record) => {
                if self.settings.policy.is_expired(record.expires_at, now_seconds()) {
                    Ok(CredentialState::ExpiringSoon)
                } else {
                    Ok(CredentialState::Valid)
                }
            }
            None => {
                let failed_at = self.failed.get(user_id).map(|at| *at);
                match failed_at {
                    Some(at) if self.failure_is_live(at, now_seconds()) => {
                        Ok(CredentialState::Failed)
                    }
                    Some(_) => {
                        self.failed.remove(user_id);
                        Ok(CredentialState::Absent)
                    }
                    None => Ok(CredentialState::Absent),
                }
            }
        }
    }

    /// Drops failure markers older than the token storage TTL.
    pub fn purge_failed(&self) -> usize {
        self.purge_failed_at(now_seconds())
    }

    fn purge_failed_at(&self, now: i64) -> usize {
        let before = self.failed.len();
        self.failed
            .retain(|_, failed_at| self.failure_is_live(*failed_at, now));
        before.saturating_sub(self.failed.len())
    }

    fn failure_is_live(&self, failed_at: i64, now: i64) -> bool {
        now - failed_at < self.settings.token_ttl.num_seconds()
    }

    /// Runs with the user's refresh lock held. `seen` is the expired record
    /// the caller read before queuing on the lock.
    async fn refresh_locked(
        &self,
        user_id: &str,
        seen: &TokenRecord,
    ) -> Result<Option<ValidToken>, CredentialError> {
        // A refresh may have completed (or failed) while this caller waited
        let Some(record) = self.load(user_id)? else {
            return Ok(None);
        };
        let now = now_seconds();
        let replaced =
            record.access_token != seen.access_token || record.expires_at != seen.expires_at;
        if !self.settings.policy.is_expired(record.expires_at, now)
            || (replaced && now < record.expires_at)
        {
            debug!(user_id = %user_id, "Using token refreshed by concurrent caller");
            return Ok(Some(ValidToken::from(&record)));
        }
        let Some(refresh_token) = record.refresh_token.clone() else {
            return Ok(None);
        };

        info!(user_id = %user_id, "Refreshing access token");

        let timeout = self.settings.refresh_timeout;
        let outcome = match tokio::time::timeout(timeout, self.refresher.refresh(&refresh_token))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        match outcome {
            Ok(refreshed) => {
                let rotated = refreshed.refresh_token.is_some();
                let new_record = TokenRecord {
                    access_token: refreshed.access_token,
                    // Keep the existing refresh token if the provider did not rotate it
                    refresh_token: refreshed.refresh_token.or(record.refresh_token),
                    expires_at: refreshed.expires_at,
                };
                self.persist(user_id, &new_record)?;
                self.failed.remove(user_id);

                info!(
                    user_id = %user_id,
                    expires_at = new_record.expires_at,
                    rotated,
                    "Access token refreshed"
                );
                Ok(Some(ValidToken::from(&new_record)))
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Token refresh failed, deleting credential; re-authentication required"
                );
                self.failed.insert(user_id.to_string(), now_seconds());
                self.store.delete(&token_key(user_id))?;
                Ok(None)
            }
        }
    }

    /// Loads and opens the stored record. Undecryptable blobs read as absent.
    fn load(&self, user_id: &str) -> Result<Option<TokenRecord>, CredentialError> {
        let Some(blob) = self.store.get(&token_key(user_id))? else {
            return Ok(None);
        };

        match self.cipher.open::<TokenRecord>(&blob) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Stored credential could not be opened, treating as absent"
                );
                Ok(None)
            }
        }
    }

    fn persist(&self, user_id: &str, record: &TokenRecord) -> Result<(), CredentialError> {
        let blob = self.cipher.seal(record).map_err(CredentialError::Seal)?;
        self.store
            .put(&token_key(user_id), &blob, self.settings.token_ttl)?;
        Ok(())
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the user's lock entry once no caller holds a reference to it.
    fn release_lock(&self, user_id: &str) {
        self.refresh_locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Periodically drops lapsed refresh-failure markers.
pub async fn run_failure_cleanup(manager: Arc<CredentialManager>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        let removed = manager.purge_failed();
        if removed > 0 {
            debug!(removed, "Lapsed refresh failure markers dropped");
        }
    }
}
