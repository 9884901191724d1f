use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

/// Failures surfaced to the front end. Each renders as one sentence.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Access is restricted to @{domain} accounts")]
    InvalidDomain { domain: String },

    #[error("Please fill in your {0}")]
    MissingField(&'static str),

    #[error("The code must be exactly 6 digits")]
    MalformedCode,

    #[error("That code is not valid. Please check it and try again")]
    InvalidCode,

    #[error("That code has expired. Please request a new one")]
    ExpiredCode,

    #[error("Too many failed attempts. Please request a new code")]
    TooManyAttempts,

    #[error("No account found for this email. Please register first")]
    NotRegistered,

    #[error("This email is already registered")]
    AlreadyRegistered,

    #[error("You can request a new code in {remaining_secs} seconds")]
    ResendTooSoon { remaining_secs: i64 },

    #[error("A request is already in progress")]
    Busy,

    #[error("Not available right now: {0}")]
    InvalidState(&'static str),

    #[error("Sign-in was interrupted. Please try again")]
    Superseded,

    #[error("Unable to reach the sign-in service: {0}")]
    Gateway(String),

    #[error("Unable to save your session: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Generic mapping for gateway failures outside OTP verification.
    pub(crate) fn from_gateway(err: ApiError, domain: &str) -> Self {
        if matches!(err, ApiError::NotFound(_)) {
            return AuthError::NotRegistered;
        }
        let Some(msg) = err.gateway_message() else {
            return AuthError::Gateway(err.to_string());
        };

        let lower = msg.to_lowercase();
        if lower.contains("restricted") || lower.contains("domain") {
            AuthError::InvalidDomain {
                domain: domain.to_string(),
            }
        } else if lower.contains("already registered") {
            AuthError::AlreadyRegistered
        } else {
            AuthError::Gateway(msg.to_string())
        }
    }

    /// Mapping for `verify-otp` rejections.
    ///
    /// The gateway reports bad and expired codes with one message, so
    /// `countdown_elapsed` (the local validity window has run out) decides
    /// between them unless the message is unambiguous.
    pub(crate) fn from_verify(err: ApiError, countdown_elapsed: bool) -> Self {
        let msg = match &err {
            ApiError::Unauthorized => return AuthError::InvalidCode,
            ApiError::NotFound(_) => return AuthError::NotRegistered,
            ApiError::BadRequest(_) | ApiError::Rejected(_) => err.gateway_message(),
            _ => None,
        };
        let Some(msg) = msg else {
            return AuthError::Gateway(err.to_string());
        };

        let lower = msg.to_lowercase();
        if lower.contains("too many") {
            AuthError::TooManyAttempts
        } else if countdown_elapsed || (lower.contains("expired") && !lower.contains("invalid")) {
            AuthError::ExpiredCode
        } else {
            AuthError::InvalidCode
        }
    }
}
