//! Google sign-in (OAuth 2.0 authorization code flow).
//!
//! 1. GET /api/auth/google/start → redirect to Google
//! 2. User consents on Google's site
//! 3. Google redirects to /api/auth/google/callback?code=..&state=..
//! 4. Exchange code, read the user from the ID token, store the credential,
//!    arm the refresh timer and issue a bearer session token

use super::AppError;
use crate::oauth::{Identity, OAuthClient, StateManager};
use crate::session::SessionService;
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Path the provider redirects back to
pub const CALLBACK_PATH: &str = "/api/auth/google/callback";

/// Shared application state for the sign-in flow
#[derive(Clone)]
pub struct SignInAppState {
    pub session: Arc<SessionService>,
    /// `None` when client credentials are not configured
    pub client: Option<OAuthClient>,
    pub state_manager: StateManager,
    pub callback_base_url: String,
}

impl SignInAppState {
    fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.callback_base_url.trim_end_matches('/'),
            CALLBACK_PATH
        )
    }

    fn client(&self) -> Result<&OAuthClient, AppError> {
        self.client.as_ref().ok_or_else(|| {
            error!("Google OAuth client not configured");
            AppError::ServerError(
                "Google sign-in not configured. Set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET environment variables."
                    .to_string(),
            )
        })
    }
}

/// OAuth callback query parameters
#[derive(Deserialize, Debug)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Sign-in success response
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    success: bool,
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    expires_at: i64,
    /// Bearer token for the user-scoped endpoints
    session_token: String,
}

/// Create sign-in API router
pub fn create_signin_router(state: SignInAppState) -> Router {
    Router::new()
        .route("/api/auth/google/start", get(sign_in_start))
        .route(CALLBACK_PATH, get(sign_in_callback))
        .with_state(Arc::new(state))
}

/// GET /api/auth/google/start
///
/// Redirects to Google with a single-use CSRF state.
async fn sign_in_start(State(state): State<Arc<SignInAppState>>) -> Result<Redirect, AppError> {
    let client = state.client()?;

    let csrf_state = state.state_manager.create_state();
    let auth_url = client
        .provider()
        .build_auth_url(&csrf_state, &state.redirect_uri());

    info!("Redirecting to Google sign-in");

    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/auth/google/callback
///
/// Validates the CSRF state, exchanges the code and completes sign-in for
/// the account named in the provider's ID token.
async fn sign_in_callback(
    State(state): State<Arc<SignInAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<SignInResponse>, AppError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Google sign-in failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!("Invalid or expired OAuth state");
            AppError::Unauthorized("Invalid or expired OAuth state".to_string())
        })?;

    debug!("CSRF state validated");

    let client = state.client()?;
    let grant = client
        .exchange_code(&code, &state.redirect_uri())
        .await
        .map_err(|e| {
            error!(error = %e, "Authorization code exchange failed");
            AppError::BadGateway(format!("Failed to exchange authorization code: {}", e))
        })?;

    let id_token = grant.id_token.ok_or_else(|| {
        error!("Token response carried no ID token");
        AppError::BadGateway(
            "Provider returned no ID token; the openid scope is required".to_string(),
        )
    })?;
    let identity = Identity::from_id_token(&id_token, &client.provider().client_id)
        .map_err(|e| {
            error!(error = %e, "Unusable ID token");
            AppError::BadGateway(format!("Failed to identify user: {}", e))
        })?;
    let user_id = identity.subject;

    if grant.record.refresh_token.is_none() {
        warn!(user_id = %user_id, "Provider issued no refresh token; token cannot be renewed");
    }

    let expires_at = grant.record.expires_at;
    let session_token = state
        .session
        .on_sign_in_complete(&user_id, grant.record)
        .await?;

    Ok(Json(SignInResponse {
        success: true,
        user_id,
        email: identity.email,
        expires_at,
        session_token,
    }))
}
