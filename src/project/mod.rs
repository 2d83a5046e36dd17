//! Project identifier validation and per-user project links.
//!
//! Validation short-circuits at the first failing step:
//!
//! 1. Blank identifier
//! 2. Identifier syntax
//! 3. Existence, billing and API enablement (one [`ProjectChecker`] call)
//!
//! Every outcome is a [`ValidationResult`]; checker failures and timeouts are
//! reported as an invalid result rather than an error.
//!
//! Once a project is linked, [`ProjectValidator::test_access`] makes one
//! request against the project with the user's access token and reports an
//! [`AccessTestResult`].

use crate::credentials::{
    project_key, CipherBox, ProjectLink, StorageError, TokenStore,
};
use crate::manager::CredentialError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};


/// Storage TTL for project link entries (365 days)
pub const DEFAULT_PROJECT_TTL_DAYS: i64 = 365;

/// Upper bound on a single project check
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const PROJECT_ID_PATTERN: &str = r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$";

/// Outcome of validating a project identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ValidationResult {
    fn ok(message: &str) -> Self {
        Self {
            valid: true,
            message: message.to_string(),
            details: None,
        }
    }

    fn invalid(message: &str, details: &[&str]) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            details: if details.is_empty() {
                None
            } else {
                Some(details.iter().map(|d| d.to_string()).collect())
            },
        }
    }
}

/// What the project check collaborator reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectStatus {
    pub exists: bool,
    pub billing_enabled: bool,
    pub api_enabled: bool,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Project check failed: {0}")]
    Failed(String),

    #[error("Project check timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of a test request against a linked project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTestResult {
    pub success: bool,
    pub message: String,
}

/// Read-only lookup of a project's existence, billing and API state.
#[async_trait]
pub trait ProjectChecker: Send + Sync {
    async fn check(&self, project_id: &str) -> Result<ProjectStatus, CheckError>;

    /// Sends one test request to the Generative Language API on behalf of
    /// `project_id`. `Ok(false)` means the API answered but refused it.
    async fn test_access(&self, access_token: &str, project_id: &str) -> Result<bool, CheckError>;
}

/// Fixed-outcome checker used until a cloud resource manager client is wired in.
///
/// `invalid-project` does not exist, `no-billing-project` has billing off,
/// `no-api-project` lacks the Generative Language API. Anything else passes.
/// Test requests fail for `fail-test-project` only.
#[derive(Clone, Debug, Default)]
pub struct SimulatedProjectChecker {
    latency: Duration,
}

impl SimulatedProjectChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial delay to every check.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ProjectChecker for SimulatedProjectChecker {
    async fn check(&self, project_id: &str) -> Result<ProjectStatus, CheckError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let status = match project_id {
            "invalid-project" => ProjectStatus {
                exists: false,
                billing_enabled: false,
                api_enabled: false,
            },
            "no-billing-project" => ProjectStatus {
                exists: true,
                billing_enabled: false,
                api_enabled: false,
            },
            "no-api-project" => ProjectStatus {
                exists: true,
                billing_enabled: true,
                api_enabled: false,
            },
            _ => ProjectStatus {
                exists: true,
                billing_enabled: true,
                api_enabled: true,
            },
        };
        Ok(status)
    }

    async fn test_access(&self, _access_token: &str, project_id: &str) -> Result<bool, CheckError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(project_id != "fail-test-project")
    }
}

static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROJECT_ID_PATTERN).expect("valid project id regex"));

/// Syntax check only: lowercase letter first, 6-30 characters of lowercase
/// letters, digits and hyphens, no trailing hyphen.
pub fn is_well_formed(project_id: &str) -> bool {
    PROJECT_ID_RE.is_match(project_id)
}

/// Validates project identifiers against syntax rules and a [`ProjectChecker`].
#[derive(Clone)]
pub struct ProjectValidator {
    checker: Arc<dyn ProjectChecker>,
    timeout: Duration,
}

impl ProjectValidator {
    pub fn new(checker: Arc<dyn ProjectChecker>, timeout: Duration) -> Self {
        Self { checker, timeout }
    }

    /// Validates `project_id` exactly as given. Surrounding whitespace only
    /// counts toward the blank check; a padded identifier is malformed.
    pub async fn validate(&self, project_id: &str) -> ValidationResult {
        if project_id.trim().is_empty() {
            return ValidationResult::invalid("Project ID cannot be empty", &[]);
        }

        if !is_well_formed(project_id) {
            debug!(project_id = %project_id, "Project ID failed syntax check");
            return ValidationResult::invalid(
                "Invalid Project ID format",
                &[
                    "Project IDs must be 6-30 characters",
                    "Can only contain lowercase letters, numbers, and hyphens",
                    "Must start with a letter",
                    "Cannot end with a hyphen",
                ],
            );
        }

        let status = match tokio::time::timeout(self.timeout, self.checker.check(project_id)).await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return check_failed(project_id, &e),
            Err(_) => return check_failed(project_id, &CheckError::Timeout(self.timeout)),
        };

        if !status.exists {
            return ValidationResult::invalid(
                "Project not found or not accessible",
                &[
                    "Ensure the project exists and you have proper permissions",
                    "The project must be created in the Google Cloud Console",
                ],
            );
        }

        if !status.billing_enabled {
            return ValidationResult::invalid(
                "Billing is not enabled for this project",
                &[
                    "You must enable billing in the Google Cloud Console",
                    "Visit: https://console.cloud.google.com/billing",
                ],
            );
        }

        if !status.api_enabled {
            return ValidationResult::invalid(
                "Generative Language API is not enabled",
                &[
                    "Enable the API in the Google Cloud Console",
                    "Visit: https://console.cloud.google.com/apis/library/generative-language.googleapis.com",
                ],
            );
        }

        ValidationResult::ok("Project validated successfully")
    }

    /// Checks that `access_token` can reach the API through `project_id`.
    pub async fn test_access(&self, access_token: &str, project_id: &str) -> AccessTestResult {
        let outcome = tokio::time::timeout(
            self.timeout,
            self.checker.test_access(access_token, project_id),
        )
        .await
        .unwrap_or(Err(CheckError::Timeout(self.timeout)));

        match outcome {
            Ok(true) => AccessTestResult {
                success: true,
                message: "Successfully connected to Gemini API with your project.".to_string(),
            },
            Ok(false) => {
                debug!(project_id = %project_id, "Test request refused");
                AccessTestResult {
                    success: false,
                    message: "Test request failed. Check your project configuration.".to_string(),
                }
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Test request errored");
                AccessTestResult {
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }
}

fn check_failed(project_id: &str, error: &CheckError) -> ValidationResult {
    warn!(project_id = %project_id, error = %error, "Project check failed");
    ValidationResult {
        valid: false,
        message: "Error validating project".to_string(),
        details: Some(vec![error.to_string()]),
    }
}

/// Encrypted per-user project links, stored under `project:<user_id>`.
pub struct ProjectLinks {
    cipher: Arc<CipherBox>,
    store: Arc<dyn TokenStore>,
    ttl: chrono::Duration,
}

impl ProjectLinks {
    pub fn new(cipher: Arc<CipherBox>, store: Arc<dyn TokenStore>, ttl: chrono::Duration) -> Self {
        Self { cipher, store, ttl }
    }

    /// Creates or overwrites the user's link.
    pub fn save(&self, link: &ProjectLink) -> Result<(), CredentialError> {
        let blob = self.cipher.seal(link).map_err(CredentialError::Seal)?;
        self.store.put(&project_key(&link.user_id), &blob, self.ttl)?;

        info!(user_id = %link.user_id, project_id = %link.project_id, "Project linked");
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Result<Option<ProjectLink>, StorageError> {
        let Some(blob) = self.store.get(&project_key(user_id))? else {
            return Ok(None);
        };

        match self.cipher.open::<ProjectLink>(&blob) {
            Ok(link) => Ok(Some(link)),
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Stored project link could not be opened, treating as absent"
                );
                Ok(None)
            }
        }
    }

    pub fn delete(&self, user_id: &str) -> Result<bool, StorageError> {
        let deleted = self.store.delete(&project_key(user_id))?;
        info!(user_id = %user_id, deleted, "Project unlinked");
        Ok(deleted)
    }
}
