use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserProfile;

/// An authenticated grant: bearer token, profile and absolute expiry.
///
/// A `Session` is always complete. The credential store never hands out a
/// session assembled from partial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub profile: UserProfile,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, profile: UserProfile, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            profile,
            expires_at,
        }
    }

    /// Valid iff `now < expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry. Negative once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Time left before expiry, clamped at zero for display.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.time_until_expiry(now).max(Duration::zero())
    }

    /// True inside the warning window `(0, threshold]`.
    pub fn is_expiring_soon(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let left = self.time_until_expiry(now);
        left > Duration::zero() && left <= threshold
    }

    /// Minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.remaining(now).num_minutes()
    }
}

/// Parse a gateway expiry timestamp.
///
/// Accepts RFC 3339 with an offset, or a naive ISO-8601 timestamp which is
/// taken as UTC (the gateway emits `datetime.isoformat()` of a UTC time).
/// Anything else is `None`, and callers treat that as already expired.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
