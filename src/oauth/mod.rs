//! OAuth 2.0 provider integration.
//!
//! - [`OAuthClient`] performs the refresh-token grant (and the one-time
//!   authorization-code exchange at sign-in) against the provider's token
//!   endpoint. Each call is a single round trip; retry policy belongs to the
//!   caller.
//! - [`OAuthProviderConfig`] holds endpoints, scopes and client credentials.
//! - [`StateManager`] issues single-use CSRF state for the sign-in redirect.
//! - [`Identity`] names the account that completed sign-in.

mod exchange;
mod identity;
mod provider;
mod state_manager;

pub use exchange::OAuthClient;
pub use identity::Identity;
pub use provider::{OAuthProviderConfig, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::credentials::TokenRecord;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result of the authorization-code exchange at sign-in.
#[derive(Clone, Debug)]
pub struct CodeGrant {
    pub record: TokenRecord,
    /// Present when the `openid` scope was granted
    pub id_token: Option<String>,
}

/// Result of a successful refresh-token grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<String>,
    /// Absolute expiry (Unix seconds), computed as now + provider TTL
    pub expires_at: i64,
}

/// The provider refused or failed a token request.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Token endpoint rejected the request ({status}): {description}")]
    Rejected { status: u16, description: String },

    #[error("Malformed token response: {0}")]
    Malformed(String),

    #[error("Token request failed: {0}")]
    Transport(String),

    #[error("Token request timed out after {0:?}")]
    Timeout(Duration),
}

/// Performs the OAuth refresh-token grant.
///
/// Implementations make exactly one provider round trip per call and never
/// retry internally.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ProviderError>;
}
