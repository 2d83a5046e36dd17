//! Caller authentication.
//!
//! Every user-scoped endpoint expects `Authorization: Bearer <session token>`.
//! Session tokens are issued by [`SessionTokens`] once the Google sign-in
//! callback has established who the user is; the user id is never taken from
//! the request itself.

use axum::http::HeaderMap;
use thiserror::Error;

mod sessions;


pub use sessions::{SessionTokens, DEFAULT_SESSION_TTL_DAYS};

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone, Error)]
pub enum TokenError {
    /// Authorization header not present
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>"
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}
