//! OAuth provider configuration.

use serde::{Deserialize, Serialize};

/// Google authorization endpoint
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google token endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token endpoint URL
    pub token_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,

    /// Client ID (from environment variable)
    pub client_id: String,

    /// Client secret (from environment variable)
    pub client_secret: String,
}

impl OAuthProviderConfig {
    /// Build authorization URL with state and redirect_uri.
    ///
    /// Requests offline access with forced consent so the provider issues a
    /// refresh token on every sign-in.
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    /// True when client credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
