//! Key/value persistence of sealed credential blobs.
//!
//! The [`TokenStore`] contract is medium-agnostic: string keys, opaque blobs,
//! a per-entry TTL, and idempotent delete. [`SqliteTokenStore`] is the durable
//! implementation used by the service deployment.

use super::EncryptedBlob;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Failure in the underlying storage medium.
///
/// Surfaced to callers as "try again"; never treated as a missing credential.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("Credential store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Durable key/value storage for sealed blobs with per-entry TTL.
///
/// Entries past their TTL are never returned by `get`. `delete` may be
/// called any number of times for the same key.
pub trait TokenStore: Send + Sync {
    /// Inserts or replaces the entry for `key`, expiring after `ttl`.
    fn put(&self, key: &str, blob: &EncryptedBlob, ttl: Duration) -> Result<(), StorageError>;

    /// Returns the live entry for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<EncryptedBlob>, StorageError>;

    /// Removes the entry for `key`. Returns whether an entry existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Drops every entry whose TTL has elapsed. Returns the number removed.
    fn purge_expired(&self) -> Result<usize, StorageError>;
}

/// Sealed blob storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credential_entries (
///     key        TEXT PRIMARY KEY,   -- token:<user_id> | project:<user_id>
///     ciphertext TEXT NOT NULL,      -- base64 AES-256-GCM ciphertext
///     nonce      TEXT NOT NULL,      -- base64 nonce
///     expires_at INTEGER NOT NULL,   -- storage TTL (Unix seconds)
///     updated_at TEXT NOT NULL       -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - A poisoned lock is reported as `StorageError::Unavailable`
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Creates or opens a store at `db_path` (`:memory:` for tests).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open credential database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credential_entries (
                key        TEXT PRIMARY KEY,
                ciphertext TEXT NOT NULL,
                nonce      TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_credential_entries_expiry
                ON credential_entries(expires_at);
            "#,
        )
        .context("Failed to create credential_entries table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }
}

impl TokenStore for SqliteTokenStore {
    fn put(&self, key: &str, blob: &EncryptedBlob, ttl: Duration) -> Result<(), StorageError> {
        let now = Utc::now();
        let expires_at = (now + ttl).timestamp();

        self.conn()?.execute(
            r#"
            INSERT INTO credential_entries (key, ciphertext, nonce, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key) DO UPDATE SET
                ciphertext = excluded.ciphertext,
                nonce = excluded.nonce,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![key, blob.ciphertext, blob.nonce, expires_at, now.to_rfc3339()],
        )?;

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<EncryptedBlob>, StorageError> {
        let now = Utc::now().timestamp();

        let blob = self
            .conn()?
            .query_row(
                r#"
                SELECT ciphertext, nonce
                FROM credential_entries
                WHERE key = ?1 AND expires_at > ?2
                "#,
                params![key, now],
                |row| {
                    Ok(EncryptedBlob {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(blob)
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let rows_affected = self
            .conn()?
            .execute("DELETE FROM credential_entries WHERE key = ?1", params![key])?;

        Ok(rows_affected > 0)
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now().timestamp();
        let removed = self.conn()?.execute(
            "DELETE FROM credential_entries WHERE expires_at <= ?1",
            params![now],
        )?;

        Ok(removed)
    }
}

/// Background task that periodically drops entries past their storage TTL.
pub async fn run_store_cleanup(store: Arc<dyn TokenStore>, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        match store.purge_expired() {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Purged expired credential entries"),
            Err(e) => tracing::warn!(error = %e, "Credential store cleanup failed"),
        }
    }
}
