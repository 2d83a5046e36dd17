use crate::oauth::{OAuthProviderConfig, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Longest accepted storage TTL for any entry kind (100 years)
pub const MAX_TTL_DAYS: i64 = 36_500;

/// Complete credvault configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredvaultConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub project: ProjectConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL the provider redirects back to
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            callback_base_url: default_callback_base_url(),
        }
    }
}

/// Credential store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
    #[serde(default = "default_project_ttl_days")]
    pub project_ttl_days: i64,
    /// Bearer session lifetime
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    /// How often expired entries are purged (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_db_path() -> String {
    "credentials.db".to_string()
}

fn default_token_ttl_days() -> i64 {
    30
}

fn default_project_ttl_days() -> i64 {
    365
}

fn default_session_ttl_days() -> i64 {
    30
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            token_ttl_days: default_token_ttl_days(),
            project_ttl_days: default_project_ttl_days(),
            session_ttl_days: default_session_ttl_days(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

/// Refresh timing
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Safety margin before expiry (seconds)
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: i64,
    /// Upper bound on one provider call (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_min_rearm_seconds")]
    pub min_rearm_seconds: u64,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

fn default_buffer_seconds() -> i64 {
    300
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_min_rearm_seconds() -> u64 {
    30
}

fn default_retry_delay_seconds() -> u64 {
    60
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: default_buffer_seconds(),
            timeout_seconds: default_timeout_seconds(),
            min_rearm_seconds: default_min_rearm_seconds(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

impl RefreshConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// OAuth provider endpoints and scopes (client credentials come from env)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "email".to_string(),
        "openid".to_string(),
        "https://www.googleapis.com/auth/generative-language".to_string(),
    ]
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            state_expiry_seconds: default_state_expiry(),
        }
    }
}

impl OAuthConfig {
    /// Provider config with client credentials from `GOOGLE_CLIENT_ID` and
    /// `GOOGLE_CLIENT_SECRET` (empty when unset).
    pub fn provider(&self) -> OAuthProviderConfig {
        OAuthProviderConfig {
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            scopes: self.scopes.clone(),
            client_id: std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
        }
    }
}

/// Project validation
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_check_timeout")]
    pub check_timeout_seconds: u64,
}

fn default_check_timeout() -> u64 {
    10
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            check_timeout_seconds: default_check_timeout(),
        }
    }
}

impl CredvaultConfig {
    /// Loads `CREDVAULT_CONFIG` if set (defaults otherwise), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("CREDVAULT_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would overflow expiry arithmetic later.
    pub fn validate(&self) -> Result<()> {
        for (name, days) in [
            ("storage.token_ttl_days", self.storage.token_ttl_days),
            ("storage.project_ttl_days", self.storage.project_ttl_days),
            ("storage.session_ttl_days", self.storage.session_ttl_days),
        ] {
            ensure!(
                (1..=MAX_TTL_DAYS).contains(&days),
                "{} must be between 1 and {} (got {})",
                name,
                MAX_TTL_DAYS,
                days
            );
        }
        ensure!(
            self.refresh.buffer_seconds >= 0,
            "refresh.buffer_seconds must not be negative (got {})",
            self.refresh.buffer_seconds
        );
        Ok(())
    }

    /// Override values from env vars, ignoring unparseable ones.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CREDVAULT_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CREDVAULT_CALLBACK_BASE_URL") {
            self.server.callback_base_url = v;
        }
        if let Ok(v) = std::env::var("CREDVAULT_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("CREDVAULT_REFRESH_BUFFER_SECONDS") {
            if let Ok(n) = v.parse::<i64>() {
                self.refresh.buffer_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CREDVAULT_REFRESH_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.refresh.timeout_seconds = n;
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<CredvaultConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: CredvaultConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
