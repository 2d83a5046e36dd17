//! CSRF state for the sign-in redirect.
//!
//! Each redirect carries a random state value. The callback must present the
//! same value once, within the expiry window. Who signed in is learned from
//! the provider afterwards, never from the state.

use crate::policy::now_seconds;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// When a pending sign-in started (Unix seconds).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateEntry {
    pub issued_at: i64,
}

/// Pending sign-in states. Clones share the same table.
#[derive(Clone)]
pub struct StateManager {
    pending: Arc<DashMap<String, StateEntry>>,
    ttl_seconds: i64,
}

impl StateManager {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Issues a fresh state value.
    pub fn create_state(&self) -> String {
        let state = Uuid::new_v4().simple().to_string();
        self.pending.insert(
            state.clone(),
            StateEntry {
                issued_at: now_seconds(),
            },
        );
        state
    }

    /// Removes `state` and returns its entry if it had not expired.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let (_, entry) = self.pending.remove(state)?;
        self.is_live(&entry, now_seconds()).then_some(entry)
    }

    /// Drops expired states, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = now_seconds();
        let before = self.pending.len();
        self.pending.retain(|_, entry| self.is_live(entry, now));
        before.saturating_sub(self.pending.len())
    }

    pub fn count(&self) -> usize {
        self.pending.len()
    }

    fn is_live(&self, entry: &StateEntry, now: i64) -> bool {
        now - entry.issued_at <= self.ttl_seconds
    }
}

/// Periodically drops abandoned sign-in states.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        let removed = manager.cleanup_expired();
        if removed > 0 {
            tracing::debug!(removed, pending = manager.count(), "Expired sign-in states dropped");
        }
    }
}
