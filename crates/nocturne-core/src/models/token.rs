// ABOUTME: Cached bearer token model with expiry bookkeeping
// ABOUTME: Memory-only credential; Debug output never includes the token value
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Short-lived bearer credential for a provider API
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    /// Token value sent in the `Authorization` header
    pub value: String,
    /// Instant after which the provider rejects the token
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Create a token
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Create a token valid for `lifetime` from `now`
    pub fn expiring_in(value: impl Into<String>, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self::new(value, now + lifetime)
    }

    /// Remaining lifetime at `now` (negative once expired)
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the token still has more than `buffer` of lifetime left at `now`
    #[must_use]
    pub fn is_valid_for(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.remaining(now) > buffer
    }

    /// `Authorization` header value
    #[must_use]
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validity_respects_buffer() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let token = AuthToken::expiring_in("abc", now, Duration::minutes(10));

        assert!(token.is_valid_for(now, Duration::minutes(5)));
        assert!(!token.is_valid_for(now + Duration::minutes(6), Duration::minutes(5)));
        assert!(!token.is_valid_for(now + Duration::minutes(11), Duration::zero()));
    }

    #[test]
    fn test_debug_redacts_value() {
        let token = AuthToken::new("super-secret", Utc::now());
        assert!(!format!("{token:?}").contains("super-secret"));
    }
}
