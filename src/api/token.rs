//! Access token endpoints.

use super::{authenticate, AppError};
use crate::manager::CredentialState;
use crate::session::SessionService;
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Response for POST /api/auth/refresh
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_at: i64,
}

/// Response for POST /api/auth/signout
#[derive(Serialize, Debug)]
pub struct SignOutResponse {
    pub success: bool,
    pub deleted: bool,
}

/// Response for GET /api/auth/status
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub user_id: String,
    pub state: CredentialState,
}

/// Create token API router
pub fn create_token_router(session: Arc<SessionService>) -> Router {
    Router::new()
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/status", get(status))
        .with_state(session)
}

/// POST /api/auth/refresh - Return a valid access token, refreshing if needed
///
/// 401 means the caller must run the sign-in flow again.
async fn refresh(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> Result<Json<AccessTokenResponse>, AppError> {
    let user_id = authenticate(&session, &headers)?.user_id;

    let token = session
        .request_access_token(&user_id)
        .await?
        .ok_or_else(|| {
            debug!(user_id = %user_id, "No valid credential, re-authentication required");
            AppError::Unauthorized("Re-authentication required".to_string())
        })?;

    Ok(Json(AccessTokenResponse {
        access_token: token.access_token,
        expires_at: token.expires_at,
    }))
}

/// POST /api/auth/signout - End the session, cancel refresh timer and
/// delete credential
async fn sign_out(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> Result<Json<SignOutResponse>, AppError> {
    let caller = authenticate(&session, &headers)?;
    let deleted = session.on_sign_out(&caller.user_id).await?;
    session.end_session(&caller.session_token)?;

    Ok(Json(SignOutResponse {
        success: true,
        deleted,
    }))
}

async fn status(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    let user_id = authenticate(&session, &headers)?.user_id;
    let state = session.credential_state(&user_id)?;

    Ok(Json(StatusResponse { user_id, state }))
}
