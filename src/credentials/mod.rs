//! Encrypted credential persistence.
//!
//! Token records and project links are sealed with AES-256-GCM before they
//! reach a [`TokenStore`]. The store only ever sees opaque blobs keyed by
//! `token:<user_id>` / `project:<user_id>` / `session:<session_id>`, each with
//! its own storage TTL that is independent of the access token's expiry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialManager / ProjectLinks   │
//! │  - TokenRecord / ProjectLink values      │
//! └─────────────────────────────────────────┘
//!          ↓ seal               ↑ open
//! ┌─────────────────────────────────────────┐
//! │       CipherBox                          │
//! │  - AES-256-GCM, unique nonce per seal    │
//! │  - Key fixed for the process lifetime    │
//! └─────────────────────────────────────────┘
//!          ↓ put                ↑ get
//! ┌─────────────────────────────────────────┐
//! │       TokenStore (SQLite / memory)       │
//! │  - Key/value with per-entry TTL          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use credvault::credentials::{
//!     token_key, CipherBox, EncryptionKey, SqliteTokenStore, TokenRecord, TokenStore,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = EncryptionKey::from_base64(&std::env::var("CREDVAULT_ENCRYPTION_KEY")?)?;
//! let cipher = CipherBox::new(&key);
//! let store = SqliteTokenStore::new("credentials.db")?;
//!
//! let record = TokenRecord {
//!     access_token: "ya29.access".to_string(),
//!     refresh_token: Some("1//refresh".to_string()),
//!     expires_at: 1_700_000_000,
//! };
//! let blob = cipher.seal(&record)?;
//! store.put(&token_key("user1"), &blob, chrono::Duration::days(30))?;
//!
//! if let Some(blob) = store.get(&token_key("user1"))? {
//!     let record: TokenRecord = cipher.open(&blob)?;
//!     println!("expires at {}", record.expires_at);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Records are encrypted at rest; tampering is detected on open
//! - Key material is never written to the store
//! - Key rotation is not supported within a process lifetime: blobs sealed
//!   under a previous key fail to open and read as "no credential"

use serde::{Deserialize, Serialize};

mod encryption;
mod memory;
mod storage;

pub use encryption::{CipherBox, CipherError, EncryptedBlob, EncryptionKey, KeySource, KEY_SIZE};
pub use memory::MemoryTokenStore;
pub use storage::{run_store_cleanup, SqliteTokenStore, StorageError, TokenStore};

/// OAuth credential for one user.
///
/// `expires_at` is the absolute provider expiry as a Unix timestamp in
/// seconds, never a duration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// OAuth access token (sent to the downstream API)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Absolute expiry of `access_token` (Unix seconds)
    pub expires_at: i64,
}

/// A user's linked cloud project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLink {
    pub user_id: String,
    pub project_id: String,
}

/// Store key for a user's token record.
pub fn token_key(user_id: &str) -> String {
    format!("token:{}", user_id)
}

/// Store key for a user's project link.
pub fn project_key(user_id: &str) -> String {
    format!("project:{}", user_id)
}

/// Store key for a bearer session.
pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}
