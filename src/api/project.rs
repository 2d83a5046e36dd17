//! Project validation and linking endpoints.

use super::{authenticate, AppError};
use crate::project::{AccessTestResult, ValidationResult};
use crate::session::{AccessCheck, SessionService};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body for project endpoints
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRequest {
    pub project_id: String,
}

/// Response for GET /api/project
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LinkedProjectResponse {
    pub project_id: String,
}

/// Response for DELETE /api/project
#[derive(Serialize, Debug)]
pub struct UnlinkResponse {
    pub success: bool,
    pub deleted: bool,
}

/// Create project API router
pub fn create_project_router(session: Arc<SessionService>) -> Router {
    Router::new()
        .route("/api/project/validate", post(validate_project))
        .route("/api/project/test", post(test_project_access))
        .route(
            "/api/project",
            put(link_project).get(get_project).delete(unlink_project),
        )
        .with_state(session)
}

/// POST /api/project/validate - Validate without linking
///
/// Always 200; the body says whether the project is usable.
async fn validate_project(
    State(session): State<Arc<SessionService>>,
    body: Result<Json<ProjectRequest>, JsonRejection>,
) -> Result<Json<ValidationResult>, AppError> {
    let Json(request) = body?;
    Ok(Json(session.validate_project(&request.project_id).await))
}

/// PUT /api/project - Validate and link to the calling user
async fn link_project(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
    body: Result<Json<ProjectRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let user_id = authenticate(&session, &headers)?.user_id;
    let Json(request) = body?;

    let result = session.link_project(&user_id, &request.project_id).await?;
    let status = if result.valid {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    Ok((status, Json(result)).into_response())
}

async fn get_project(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> Result<Json<LinkedProjectResponse>, AppError> {
    let user_id = authenticate(&session, &headers)?.user_id;

    let project_id = session
        .linked_project(&user_id)?
        .ok_or_else(|| AppError::NotFound("No project linked".to_string()))?;

    Ok(Json(LinkedProjectResponse { project_id }))
}

async fn unlink_project(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> Result<Json<UnlinkResponse>, AppError> {
    let user_id = authenticate(&session, &headers)?.user_id;
    let deleted = session.unlink_project(&user_id)?;

    Ok(Json(UnlinkResponse {
        success: true,
        deleted,
    }))
}

/// POST /api/project/test - Send a test request through the linked project
///
/// 200 with the outcome, 404 without a linked project, 401 when the user
/// must sign in again.
async fn test_project_access(
    State(session): State<Arc<SessionService>>,
    headers: HeaderMap,
) -> Result<Json<AccessTestResult>, AppError> {
    let user_id = authenticate(&session, &headers)?.user_id;

    match session.test_project_access(&user_id).await? {
        AccessCheck::Tested(result) => Ok(Json(result)),
        AccessCheck::NoProject => Err(AppError::NotFound("No project linked".to_string())),
        AccessCheck::ReauthRequired => Err(AppError::Unauthorized(
            "Re-authentication required".to_string(),
        )),
    }
}
