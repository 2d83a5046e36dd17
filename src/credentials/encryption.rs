//! AES-256-GCM sealing of credential records.
//!
//! Each record is serialized to JSON and encrypted with a fresh random nonce.
//! The key is loaded (or generated) once at startup and handed to a single
//! [`CipherBox`] that lives for the rest of the process.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Errors raised while sealing or opening a blob.
///
/// `Decrypt` covers tampering, a foreign key and malformed input alike.
/// Callers treat it exactly like "no credential found".
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Failed to decrypt credential: {0}")]
    Decrypt(String),

    #[error("Failed to encrypt credential: {0}")]
    Encrypt(String),
}

/// Opaque authenticated ciphertext of a sealed record.
///
/// Both fields are base64-encoded for storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub nonce: String,
}

/// Where the process-wide key came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySource {
    /// Loaded from configuration
    Configured,
    /// Generated at startup; sealed data does not survive a restart
    Ephemeral,
}

/// 256-bit key material.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Decodes a base64 key and checks it is exactly 32 bytes.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Failed to decode base64 encryption key")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&key_bytes);
        Ok(Self { bytes })
    }

    /// Generates a random key from the OS RNG.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(key.as_slice());
        Self { bytes }
    }

    /// Uses the configured key when present, otherwise generates an
    /// ephemeral one. A configured but invalid key is an error.
    pub fn from_config(configured: Option<&str>) -> Result<(Self, KeySource)> {
        match configured {
            Some(secret) if !secret.trim().is_empty() => {
                let key = Self::from_base64(secret).context("Invalid encryption key")?;
                Ok((key, KeySource::Configured))
            }
            _ => Ok((Self::generate(), KeySource::Ephemeral)),
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Authenticated-encryption wrapper for credential records.
#[derive(Clone)]
pub struct CipherBox {
    cipher: Aes256Gcm,
}

impl CipherBox {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.bytes)),
        }
    }

    /// Serializes `value` and encrypts it under a fresh nonce.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<EncryptedBlob, CipherError> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CipherError::Encrypt(e.to_string()))?;

        // Generate random nonce (never reuse!)
        let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext_bytes = self
            .cipher
            .encrypt(&nonce_bytes, plaintext.as_ref())
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        Ok(EncryptedBlob {
            ciphertext: BASE64.encode(&ciphertext_bytes),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    /// Decrypts and deserializes a blob produced by [`CipherBox::seal`].
    pub fn open<T: DeserializeOwned>(&self, blob: &EncryptedBlob) -> Result<T, CipherError> {
        let ciphertext_bytes = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| CipherError::Decrypt(format!("invalid ciphertext encoding: {}", e)))?;
        let nonce_bytes = BASE64
            .decode(&blob.nonce)
            .map_err(|e| CipherError::Decrypt(format!("invalid nonce encoding: {}", e)))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CipherError::Decrypt(format!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext_bytes.as_ref())
            .map_err(|_| CipherError::Decrypt("wrong key or corrupted data".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CipherError::Decrypt(format!("unexpected payload: {}", e)))
    }
}
