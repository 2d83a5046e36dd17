//! HTTP adapters over [`SessionService`](crate::session::SessionService).
//!
//! Handlers only translate between HTTP and session calls:
//!
//! User-scoped handlers first resolve the bearer session token with
//! [`authenticate`]; the user id always comes from the session.
//!
//! | Outcome | Status |
//! |---|---|
//! | re-authentication required, unknown or missing session | 401 |
//! | no project linked | 404 |
//! | credential store failure | 503 |
//! | project failed validation on link | 422 |
//! | malformed request | 400 |

mod project;
mod signin;
mod token;

pub use project::create_project_router;
pub use signin::{create_signin_router, SignInAppState, CALLBACK_PATH};
pub use token::create_token_router;

use crate::auth::{extract_bearer_token, TokenError};
use crate::credentials::StorageError;
use crate::manager::CredentialError;
use crate::session::SessionService;
use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, error};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Unavailable(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(format!("Invalid token: {}", e))
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        error!(error = %e, "Credential store failure");
        AppError::Unavailable("Credential store unavailable, try again".to_string())
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Storage(e) => e.into(),
            CredentialError::Seal(e) => {
                error!(error = %e, "Failed to seal credential");
                AppError::ServerError("Failed to store credential".to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

/// The authenticated caller of a user-scoped endpoint.
struct Caller {
    user_id: String,
    session_token: String,
}

/// Resolves the bearer session token in `headers` to its user.
fn authenticate(session: &SessionService, headers: &HeaderMap) -> Result<Caller, AppError> {
    let session_token = extract_bearer_token(headers)?;
    let user_id = session.authenticate(&session_token)?.ok_or_else(|| {
        debug!("Unknown or expired session token");
        AppError::Unauthorized("Invalid or expired session".to_string())
    })?;

    Ok(Caller {
        user_id,
        session_token,
    })
}
