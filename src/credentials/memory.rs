//! In-memory [`TokenStore`] for request-scoped deployments and tests.

use super::{EncryptedBlob, StorageError, TokenStore};
use chrono::{Duration, Utc};
use dashmap::DashMap;

struct Entry {
    blob: EncryptedBlob,
    expires_at: i64,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, Entry>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including ones past their TTL.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn put(&self, key: &str, blob: &EncryptedBlob, ttl: Duration) -> Result<(), StorageError> {
        let expires_at = (Utc::now() + ttl).timestamp();
        self.entries.insert(
            key.to_string(),
            Entry {
                blob: blob.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<EncryptedBlob>, StorageError> {
        let now = Utc::now().timestamp();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.blob.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now().timestamp();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}
