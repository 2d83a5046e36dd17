//! Token endpoint calls: refresh-token grant and authorization-code exchange.

use super::{CodeGrant, OAuthProviderConfig, ProviderError, RefreshedToken, TokenRefresher};
use crate::credentials::TokenRecord;
use crate::policy::now_seconds;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    /// OpenID Connect ID token (code exchange with the `openid` scope)
    #[serde(default)]
    id_token: Option<String>,
}

/// OAuth error response body (RFC 6749 §5.2)
#[derive(Deserialize, Debug)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for a single provider's token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    provider: OAuthProviderConfig,
    timeout: Duration,
}

impl OAuthClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(provider: OAuthProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            provider,
            timeout,
        })
    }

    pub fn provider(&self) -> &OAuthProviderConfig {
        &self.provider
    }

    /// Exchanges an authorization code for the initial token record.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CodeGrant, ProviderError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.provider.client_id.as_str()),
            ("client_secret", self.provider.client_secret.as_str()),
        ];

        debug!(token_url = %self.provider.token_url, "Exchanging authorization code for token");

        let response = self.post_form(&form).await?;
        let expires_at = expires_at_from(response.expires_in)?;

        debug!(
            has_refresh_token = response.refresh_token.is_some(),
            has_id_token = response.id_token.is_some(),
            expires_at, "Authorization code exchange successful"
        );

        Ok(CodeGrant {
            record: TokenRecord {
                access_token: response.access_token,
                refresh_token: response.refresh_token,
                expires_at,
            },
            id_token: response.id_token,
        })
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let response = self
            .http
            .post(&self.provider.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                description: error_description(&body, status),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(ProviderError::Malformed("empty access_token".to_string()));
        }

        Ok(token)
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ProviderError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.provider.client_id.as_str()),
            ("client_secret", self.provider.client_secret.as_str()),
        ];

        let response = self.post_form(&form).await?;
        let expires_at = expires_at_from(response.expires_in)?;

        Ok(RefreshedToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        })
    }
}

/// Converts the provider-reported TTL into an absolute expiry.
fn expires_at_from(expires_in: Option<i64>) -> Result<i64, ProviderError> {
    match expires_in {
        Some(seconds) if seconds > 0 => Ok(now_seconds() + seconds),
        Some(seconds) => Err(ProviderError::Malformed(format!(
            "non-positive expires_in: {}",
            seconds
        ))),
        None => Err(ProviderError::Malformed("missing expires_in".to_string())),
    }
}

/// Best human-readable reason from an error body.
fn error_description(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<TokenErrorResponse>(body) {
        if let Some(description) = parsed.error_description.filter(|d| !d.is_empty()) {
            return description;
        }
        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return error;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> OAuthClient {
        OAuthClient::new(
            OAuthProviderConfig {
                auth_url: format!("{}/auth", server.url()),
                token_url: format!("{}/token", server.url()),
                scopes: vec!["email".to_string()],
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "ya29.a0",
            "refresh_token": "1//0g",
            "expires_in": 3599,
            "token_type": "Bearer"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "ya29.a0");
        assert_eq!(response.refresh_token, Some("1//0g".to_string()));
        assert_eq!(response.expires_in, Some(3599));
    }

    #[test]
    fn test_error_description_prefers_description() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            error_description(
                r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
                status
            ),
            "Token has been expired or revoked."
        );
        assert_eq!(
            error_description(r#"{"error":"invalid_grant"}"#, status),
            "invalid_grant"
        );
        assert_eq!(error_description("", status), "Bad Request");
        assert_eq!(error_description("upstream down", status), "upstream down");
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "my_refresh".into()),
                mockito::Matcher::UrlEncoded("client_id".into(), "client-id".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new_token","expires_in":3600}"#)
            .create_async()
            .await;

        let before = now_seconds();
        let refreshed = client_for(&server).refresh("my_refresh").await.unwrap();

        assert_eq!(refreshed.access_token, "new_token");
        assert_eq!(refreshed.refresh_token, None);
        assert!(refreshed.expires_at >= before + 3600);
        assert!(refreshed.expires_at <= now_seconds() + 3600);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_returns_rotated_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"a2","refresh_token":"r2","expires_in":60}"#)
            .create_async()
            .await;

        let refreshed = client_for(&server).refresh("r1").await.unwrap();
        assert_eq!(refreshed.refresh_token, Some("r2".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_rejected_carries_description() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Bad Request"}"#)
            .create_async()
            .await;

        let err = client_for(&server).refresh("revoked").await.unwrap_err();
        match err {
            ProviderError::Rejected {
                status,
                description,
            } => {
                assert_eq!(status, 400);
                assert_eq!(description, "Bad Request");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server).refresh("r").await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_refresh_missing_expiry_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"a"}"#)
            .create_async()
            .await;

        let err = client_for(&server).refresh("r").await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "auth_code_123".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"access_token":"a1","refresh_token":"r1","expires_in":3599,"id_token":"h.p.s"}"#,
            )
            .create_async()
            .await;

        let grant = client_for(&server)
            .exchange_code("auth_code_123", "http://localhost/callback")
            .await
            .unwrap();

        assert_eq!(grant.record.access_token, "a1");
        assert_eq!(grant.record.refresh_token, Some("r1".to_string()));
        assert!(grant.record.expires_at > now_seconds());
        assert_eq!(grant.id_token.as_deref(), Some("h.p.s"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let client = OAuthClient::new(
            OAuthProviderConfig {
                auth_url: "http://127.0.0.1:9/auth".to_string(),
                token_url: "http://127.0.0.1:9/token".to_string(),
                scopes: vec![],
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.refresh("r").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Transport(_) | ProviderError::Timeout(_)
        ));
    }
}
