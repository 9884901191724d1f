//! Local OTP checks and the resend countdown.
//!
//! The gateway owns the actual challenge. The client only mirrors its
//! validity window so it can tell the user how long the code lasts and
//! refuse resends until the window has run out.

use chrono::{DateTime, Duration, Utc};

use super::AuthError;

/// Number of digits in an OTP
pub const OTP_LENGTH: usize = 6;

/// Maximum email length accepted before any network call
const MAX_EMAIL_LENGTH: usize = 254;

/// Trim and lowercase an email, rejecting anything that is not `local@domain`.
pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return Err(AuthError::InvalidEmail);
    }

    let (local, domain) = email.split_once('@').ok_or(AuthError::InvalidEmail)?;
    let well_formed = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);

    if well_formed {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

/// The email must belong to exactly `domain` (no subdomains).
pub fn check_domain(email: &str, domain: &str) -> Result<(), AuthError> {
    let domain = domain.trim().trim_start_matches('@').to_lowercase();
    match email.rsplit_once('@') {
        Some((_, d)) if d == domain => Ok(()),
        _ => Err(AuthError::InvalidDomain { domain }),
    }
}

/// Trim a code and require exactly six ASCII digits.
pub fn normalize_code(raw: &str) -> Result<String, AuthError> {
    let code = raw.trim();
    if code.len() == OTP_LENGTH && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(code.to_string())
    } else {
        Err(AuthError::MalformedCode)
    }
}

/// Local mirror of an issued OTP's validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpCountdown {
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub valid_for: Duration,
}

impl OtpCountdown {
    pub fn new(email: impl Into<String>, issued_at: DateTime<Utc>, valid_for: Duration) -> Self {
        Self {
            email: email.into(),
            issued_at,
            valid_for,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + self.valid_for
    }

    /// Time left on the code, clamped at zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).max(Duration::zero())
    }

    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now) == Duration::zero()
    }

    /// A new code may be requested once the current one has run out.
    pub fn can_resend(&self, now: DateTime<Utc>) -> bool {
        self.is_elapsed(now)
    }
}
