//! Proactive refresh scheduling.
//!
//! One timer per active session. The timer sleeps until
//! `expires_at - buffer`, asks the credential manager for a valid token
//! (which refreshes it), then re-arms from the new expiry. It stops when the
//! manager reports that re-authentication is required.
//!
//! Timers are owned through a [`SessionTimer`] handle; dropping or cancelling
//! the handle aborts the task.

use crate::manager::CredentialManager;
use crate::policy::{now_seconds, ExpiryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum delay between two consecutive timer firings
pub const DEFAULT_MIN_REARM: Duration = Duration::from_secs(30);

/// Delay before retrying after a storage failure
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub struct SchedulerSettings {
    pub min_rearm: Duration,
    pub retry_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_rearm: DEFAULT_MIN_REARM,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Time to wait before refreshing a token that expires at `expires_at`.
///
/// Zero when the refresh point has already passed. Never less than `floor`.
pub fn delay_until_refresh(
    policy: ExpiryPolicy,
    expires_at: i64,
    now: i64,
    floor: Duration,
) -> Duration {
    let seconds = (policy.refresh_at(expires_at) - now).max(0) as u64;
    Duration::from_secs(seconds).max(floor)
}

/// Arms per-session refresh timers against a shared [`CredentialManager`].
#[derive(Clone)]
pub struct ProactiveScheduler {
    manager: Arc<CredentialManager>,
    settings: SchedulerSettings,
}

impl ProactiveScheduler {
    pub fn new(manager: Arc<CredentialManager>, settings: SchedulerSettings) -> Self {
        Self { manager, settings }
    }

    /// Starts a timer for `user_id` whose current token expires at `expires_at`.
    pub fn arm(&self, user_id: &str, expires_at: i64) -> SessionTimer {
        let manager = Arc::clone(&self.manager);
        let settings = self.settings;
        let owner = user_id.to_string();

        let handle = tokio::spawn(run_timer(manager, owner, expires_at, settings));

        debug!(user_id = %user_id, expires_at, "Refresh timer armed");

        SessionTimer {
            user_id: user_id.to_string(),
            handle,
        }
    }
}

/// Scoped handle to a running refresh timer.
#[derive(Debug)]
pub struct SessionTimer {
    user_id: String,
    handle: JoinHandle<()>,
}

impl SessionTimer {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// False once the timer was cancelled or stopped on its own.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
            debug!(user_id = %self.user_id, "Refresh timer cancelled");
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_timer(
    manager: Arc<CredentialManager>,
    user_id: String,
    mut expires_at: i64,
    settings: SchedulerSettings,
) {
    let policy = manager.policy();
    // First firing may be immediate if the token is already inside the buffer
    let mut floor = Duration::ZERO;

    loop {
        let delay = delay_until_refresh(policy, expires_at, now_seconds(), floor);
        if !delay.is_zero() {
            debug!(
                user_id = %user_id,
                delay_secs = delay.as_secs(),
                "Waiting for proactive refresh"
            );
            tokio::time::sleep(delay).await;
        }

        debug!(user_id = %user_id, "Proactive refresh timer fired");

        match manager.valid_token(&user_id).await {
            Ok(Some(token)) => {
                expires_at = token.expires_at;
                floor = settings.min_rearm;
                debug!(user_id = %user_id, expires_at, "Refresh timer re-armed");
            }
            Ok(None) => {
                info!(
                    user_id = %user_id,
                    "No usable credential, stopping refresh timer"
                );
                return;
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    retry_secs = settings.retry_delay.as_secs(),
                    "Proactive refresh could not read credential store, will retry"
                );
                floor = settings.retry_delay;
            }
        }
    }
}
