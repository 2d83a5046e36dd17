// Integration tests for /api/auth/refresh, /api/auth/signout and /api/auth/status

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use credvault::api::create_token_router;
use credvault::auth::{SessionTokens, DEFAULT_SESSION_TTL_DAYS};
use credvault::credentials::{CipherBox, EncryptionKey, MemoryTokenStore, TokenRecord, TokenStore};
use credvault::manager::{CredentialManager, ManagerSettings};
use credvault::oauth::{OAuthClient, OAuthProviderConfig, TokenRefresher};
use credvault::policy::now_seconds;
use credvault::project::{ProjectLinks, ProjectValidator, SimulatedProjectChecker};
use credvault::scheduler::{ProactiveScheduler, SchedulerSettings};
use credvault::session::SessionService;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Session service plus direct access to its bearer sessions.
struct TestApp {
    session: Arc<SessionService>,
    sessions: SessionTokens,
}

impl TestApp {
    /// Bearer for `user_id` without a stored credential.
    fn bearer(&self, user_id: &str) -> String {
        self.sessions.issue(user_id).unwrap()
    }
}

/// Session backed by an in-memory store and a provider at `token_url`.
fn create_app(token_url: &str) -> TestApp {
    let cipher = Arc::new(CipherBox::new(&EncryptionKey::generate()));
    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let client = OAuthClient::new(
        OAuthProviderConfig {
            auth_url: "https://accounts.example.com/auth".to_string(),
            token_url: token_url.to_string(),
            scopes: vec!["email".to_string()],
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        },
        Duration::from_secs(5),
    )
    .unwrap();

    let manager = Arc::new(CredentialManager::new(
        Arc::clone(&cipher),
        Arc::clone(&store),
        Arc::new(client) as Arc<dyn TokenRefresher>,
        ManagerSettings::default(),
    ));

    let sessions = SessionTokens::new(
        Arc::clone(&cipher),
        Arc::clone(&store),
        chrono::Duration::days(DEFAULT_SESSION_TTL_DAYS),
    );

    let session = Arc::new(SessionService::new(
        Arc::clone(&manager),
        ProactiveScheduler::new(manager, SchedulerSettings::default()),
        ProjectValidator::new(
            Arc::new(SimulatedProjectChecker::new()),
            Duration::from_secs(5),
        ),
        ProjectLinks::new(cipher, store, chrono::Duration::days(365)),
        sessions.clone(),
    ));

    TestApp { session, sessions }
}

fn record(access: &str, expires_in: i64) -> TokenRecord {
    TokenRecord {
        access_token: access.to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: now_seconds() + expires_in,
    }
}

fn post(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", bearer));
    }
    builder.body(Body::empty()).unwrap()
}

fn status_request(bearer: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/auth/status")
        .header("authorization", format!("Bearer {}", bearer))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn app(test: &TestApp) -> Router {
    create_token_router(Arc::clone(&test.session))
}

/// Missing bearer token is rejected.
#[tokio::test]
async fn test_refresh_requires_bearer() {
    let test = create_app("http://127.0.0.1:9/token");

    let response = app(&test)
        .oneshot(post("/api/auth/refresh", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// A user id presented as the bearer is not a session.
#[tokio::test]
async fn test_user_id_bearer_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;

    let test = create_app(&format!("{}/token", server.url()));
    let session_token = test
        .session
        .on_sign_in_complete("alice@example.com", record("ya29.ALICE-SECRET", 3600))
        .await
        .unwrap();

    for forged in [
        "alice@example.com".to_string(),
        format!("{}x", session_token),
        format!("{}.forged", session_token.split('.').next().unwrap()),
    ] {
        let response = app(&test)
            .oneshot(post("/api/auth/refresh", Some(&forged)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "bearer {}", forged);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid or expired session");
    }

    let response = app(&test)
        .oneshot(post("/api/auth/refresh", Some(&session_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["accessToken"], "ya29.ALICE-SECRET");

    mock.assert_async().await;
}

/// A valid session without a stored credential must re-authenticate.
#[tokio::test]
async fn test_refresh_without_credential_is_unauthorized() {
    let test = create_app("http://127.0.0.1:9/token");
    let bearer = test.bearer("alice");

    let response = app(&test)
        .oneshot(post("/api/auth/refresh", Some(&bearer)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Re-authentication required");
}

/// A fresh token is returned without touching the provider.
#[tokio::test]
async fn test_refresh_returns_stored_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;

    let test = create_app(&format!("{}/token", server.url()));
    let bearer = test
        .session
        .on_sign_in_complete("alice", record("fresh-token", 3600))
        .await
        .unwrap();

    let response = app(&test)
        .oneshot(post("/api/auth/refresh", Some(&bearer)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["accessToken"], "fresh-token");
    assert!(body["expiresAt"].as_i64().unwrap() > now_seconds());

    mock.assert_async().await;
}

/// An expiring token is refreshed through the provider.
#[tokio::test]
async fn test_refresh_renews_expiring_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "refresh_token".into(),
            "refresh-1".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"renewed-token","expires_in":3599,"token_type":"Bearer"}"#)
        .expect(1)
        .create_async()
        .await;

    let test = create_app(&format!("{}/token", server.url()));
    let bearer = test.bearer("alice");
    test.session
        .manager()
        .store_initial_token("alice", &record("old-token", 120))
        .await
        .unwrap();

    let response = app(&test)
        .oneshot(post("/api/auth/refresh", Some(&bearer)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["accessToken"], "renewed-token");

    mock.assert_async().await;
}

/// Concurrent refresh requests share one provider call.
#[tokio::test]
async fn test_concurrent_refresh_requests_single_provider_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"renewed-token","expires_in":3599}"#)
        .expect(1)
        .create_async()
        .await;

    let test = create_app(&format!("{}/token", server.url()));
    let bearer = test.bearer("alice");
    test.session
        .manager()
        .store_initial_token("alice", &record("old-token", -10))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app(&test);
        let bearer = bearer.clone();
        handles.push(tokio::spawn(async move {
            router
                .oneshot(post("/api/auth/refresh", Some(&bearer)))
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["accessToken"], "renewed-token");
    }

    mock.assert_async().await;
}

/// A rejected refresh deletes the credential and forces re-authentication.
#[tokio::test]
async fn test_rejected_refresh_forces_reauth() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
        .expect(1)
        .create_async()
        .await;

    let test = create_app(&format!("{}/token", server.url()));
    let bearer = test.bearer("alice");
    test.session
        .manager()
        .store_initial_token("alice", &record("old-token", -10))
        .await
        .unwrap();

    let response = app(&test)
        .oneshot(post("/api/auth/refresh", Some(&bearer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Re-authentication required");

    let response = app(&test)
        .oneshot(status_request(&bearer))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["state"], "failed");
}

/// Sign-out clears the credential and ends the presented session.
#[tokio::test]
async fn test_sign_out_ends_session() {
    let test = create_app("http://127.0.0.1:9/token");
    let bearer = test
        .session
        .on_sign_in_complete("alice", record("fresh-token", 3600))
        .await
        .unwrap();
    let other_device = test.bearer("alice");

    let response = app(&test)
        .oneshot(post("/api/auth/signout", Some(&bearer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["deleted"], true);

    // The ended session no longer authenticates
    let response = app(&test)
        .oneshot(post("/api/auth/signout", Some(&bearer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Signing out again elsewhere is harmless
    let response = app(&test)
        .oneshot(post("/api/auth/signout", Some(&other_device)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["deleted"], false);
}

/// Status reflects the credential lifecycle.
#[tokio::test]
async fn test_status_reports_state() {
    let test = create_app("http://127.0.0.1:9/token");
    let bearer = test.bearer("alice");

    let response = app(&test).oneshot(status_request(&bearer)).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["state"], "absent");
    assert_eq!(body["userId"], "alice");

    test.session
        .on_sign_in_complete("alice", record("fresh-token", 3600))
        .await
        .unwrap();
    let response = app(&test).oneshot(status_request(&bearer)).await.unwrap();
    assert_eq!(json_body(response).await["state"], "valid");
}
