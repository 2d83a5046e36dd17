//! Session-facing entry points.
//!
//! Ties credential storage, proactive refresh timers, bearer sessions and
//! project links together for the sign-in, sign-out and request paths. Each
//! signed-in user owns at most one [`SessionTimer`]; replacing or removing it
//! aborts the old timer.

use crate::auth::SessionTokens;
use crate::credentials::{ProjectLink, StorageError, TokenRecord};
use crate::manager::{CredentialError, CredentialManager, CredentialState, ValidToken};
use crate::project::{AccessTestResult, ProjectLinks, ProjectValidator, ValidationResult};
use crate::scheduler::{ProactiveScheduler, SessionTimer};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`SessionService::test_project_access`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessCheck {
    NoProject,
    ReauthRequired,
    Tested(AccessTestResult),
}

pub struct SessionService {
    manager: Arc<CredentialManager>,
    scheduler: ProactiveScheduler,
    validator: ProjectValidator,
    links: ProjectLinks,
    sessions: SessionTokens,
    timers: DashMap<String, SessionTimer>,
}

impl SessionService {
    pub fn new(
        manager: Arc<CredentialManager>,
        scheduler: ProactiveScheduler,
        validator: ProjectValidator,
        links: ProjectLinks,
        sessions: SessionTokens,
    ) -> Self {
        Self {
            manager,
            scheduler,
            validator,
            links,
            sessions,
            timers: DashMap::new(),
        }
    }

    pub fn manager(&self) -> &Arc<CredentialManager> {
        &self.manager
    }

    /// Stores the sign-in credential, (re)arms the user's refresh timer and
    /// returns a new bearer session token for the user.
    ///
    /// `user_id` must come from the provider's verified identity.
    pub async fn on_sign_in_complete(
        &self,
        user_id: &str,
        record: TokenRecord,
    ) -> Result<String, CredentialError> {
        self.manager.store_initial_token(user_id, &record).await?;
        self.arm(user_id, record.expires_at);
        let session_token = self.sessions.issue(user_id)?;

        info!(user_id = %user_id, "Sign-in complete");
        Ok(session_token)
    }

    /// Resolves a bearer session token to its user id.
    pub fn authenticate(&self, session_token: &str) -> Result<Option<String>, StorageError> {
        self.sessions.resolve(session_token)
    }

    /// Revokes one bearer session token.
    pub fn end_session(&self, session_token: &str) -> Result<bool, StorageError> {
        self.sessions.revoke(session_token)
    }

    /// Deletes the credential and cancels the refresh timer.
    ///
    /// The project link survives sign-out.
    pub async fn on_sign_out(&self, user_id: &str) -> Result<bool, CredentialError> {
        // Clear before disarming: a concurrent request that arms after this
        // point finds no credential and disarms itself
        let deleted = self.manager.clear(user_id).await?;
        self.disarm(user_id);

        info!(user_id = %user_id, deleted, "Signed out");
        Ok(deleted)
    }

    /// Returns a valid token, or `None` when the user must sign in again.
    pub async fn request_access_token(
        &self,
        user_id: &str,
    ) -> Result<Option<ValidToken>, CredentialError> {
        match self.manager.valid_token(user_id).await? {
            Some(token) => {
                let armed = self
                    .timers
                    .get(user_id)
                    .map(|timer| timer.is_active())
                    .unwrap_or(false);
                if !armed {
                    self.arm(user_id, token.expires_at);
                    // Lost a race with sign-out
                    if matches!(
                        self.manager.state(user_id)?,
                        CredentialState::Absent | CredentialState::Failed
                    ) {
                        debug!(user_id = %user_id, "Credential cleared while arming");
                        self.disarm(user_id);
                    }
                }
                Ok(Some(token))
            }
            None => {
                self.disarm(user_id);
                Ok(None)
            }
        }
    }

    pub fn credential_state(&self, user_id: &str) -> Result<CredentialState, CredentialError> {
        self.manager.state(user_id)
    }

    pub async fn validate_project(&self, project_id: &str) -> ValidationResult {
        self.validator.validate(project_id).await
    }

    /// Validates `project_id` and links it to the user when valid.
    pub async fn link_project(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<ValidationResult, CredentialError> {
        let result = self.validator.validate(project_id).await;
        if !result.valid {
            debug!(user_id = %user_id, message = %result.message, "Project not linked");
            return Ok(result);
        }

        self.links.save(&ProjectLink {
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
        })?;
        Ok(result)
    }

    /// Sends a test request through the user's linked project with a
    /// valid access token.
    pub async fn test_project_access(&self, user_id: &str) -> Result<AccessCheck, CredentialError> {
        let Some(project_id) = self.linked_project(user_id)? else {
            return Ok(AccessCheck::NoProject);
        };
        let Some(token) = self.request_access_token(user_id).await? else {
            return Ok(AccessCheck::ReauthRequired);
        };

        let result = self
            .validator
            .test_access(&token.access_token, &project_id)
            .await;
        info!(
            user_id = %user_id,
            project_id = %project_id,
            success = result.success,
            "Project access tested"
        );
        Ok(AccessCheck::Tested(result))
    }

    pub fn unlink_project(&self, user_id: &str) -> Result<bool, StorageError> {
        self.links.delete(user_id)
    }

    pub fn linked_project(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.links.get(user_id)?.map(|link| link.project_id))
    }

    /// Number of timers still running.
    pub fn active_timers(&self) -> usize {
        self.timers.iter().filter(|t| t.is_active()).count()
    }

    /// Cancels every timer.
    pub fn shutdown(&self) {
        let count = self.timers.len();
        self.timers.clear();
        info!(timer_count = count, "Session timers cancelled");
    }

    fn arm(&self, user_id: &str, expires_at: i64) {
        let timer = self.scheduler.arm(user_id, expires_at);
        if let Some(old) = self.timers.insert(user_id.to_string(), timer) {
            old.cancel();
            debug!(user_id = %user_id, "Replaced existing refresh timer");
        }
    }

    fn disarm(&self, user_id: &str) {
        if let Some((_, timer)) = self.timers.remove(user_id) {
            timer.cancel();
        }
    }
}
