//! Expiry policy for access tokens.
//!
//! A token is considered expired once `now` reaches `expires_at - buffer`.
//! The buffer absorbs clock skew and request latency so a token handed to a
//! caller does not lapse mid-request. Both the credential manager and the
//! proactive scheduler consult this one predicate.

use chrono::Utc;

/// Default safety margin before the provider-reported expiry (5 minutes).
pub const DEFAULT_BUFFER_SECONDS: i64 = 300;

/// Returns true if a token expiring at `expires_at` must not be used at `now`.
///
/// All values are Unix timestamps in seconds. A negative buffer is treated as
/// zero, so a past `expires_at` is always expired.
pub fn is_expired(expires_at: i64, now: i64, buffer_seconds: i64) -> bool {
    now >= expires_at.saturating_sub(buffer_seconds.max(0))
}

/// Current Unix time in seconds.
pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Buffer-aware expiry policy shared by the manager and the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryPolicy {
    buffer_seconds: i64,
}

impl ExpiryPolicy {
    pub fn new(buffer_seconds: i64) -> Self {
        Self {
            buffer_seconds: buffer_seconds.max(0),
        }
    }

    pub fn buffer_seconds(&self) -> i64 {
        self.buffer_seconds
    }

    pub fn is_expired(&self, expires_at: i64, now: i64) -> bool {
        is_expired(expires_at, now, self.buffer_seconds)
    }

    /// The instant at which a proactive refresh should run.
    pub fn refresh_at(&self, expires_at: i64) -> i64 {
        expires_at.saturating_sub(self.buffer_seconds)
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-07-01T00:00:00Z
    const NOW: i64 = 1_625_097_600;

    #[test]
    fn test_already_expired() {
        assert!(is_expired(NOW - 3600, NOW, DEFAULT_BUFFER_SECONDS));
    }

    #[test]
    fn test_expiring_within_buffer() {
        assert!(is_expired(NOW + 240, NOW, DEFAULT_BUFFER_SECONDS));
    }

    #[test]
    fn test_valid_beyond_buffer() {
        assert!(!is_expired(NOW + 600, NOW, DEFAULT_BUFFER_SECONDS));
        assert!(!is_expired(NOW + 3600, NOW, DEFAULT_BUFFER_SECONDS));
    }

    #[test]
    fn test_buffer_boundary_is_expired() {
        // now == expires_at - buffer counts as expired
        assert!(is_expired(NOW + 300, NOW, DEFAULT_BUFFER_SECONDS));
        assert!(!is_expired(NOW + 301, NOW, DEFAULT_BUFFER_SECONDS));
    }

    #[test]
    fn test_past_expiry_ignores_buffer() {
        assert!(is_expired(NOW - 1, NOW, 0));
        assert!(is_expired(NOW - 1, NOW, -500));
    }

    #[test]
    fn test_policy_refresh_at() {
        let policy = ExpiryPolicy::default();
        assert_eq!(policy.buffer_seconds(), 300);
        assert_eq!(policy.refresh_at(NOW + 3600), NOW + 3300);
        assert!(policy.is_expired(NOW + 240, NOW));
        assert!(!policy.is_expired(NOW + 600, NOW));
    }

    #[test]
    fn test_negative_buffer_clamped() {
        let policy = ExpiryPolicy::new(-10);
        assert_eq!(policy.buffer_seconds(), 0);
    }
}
