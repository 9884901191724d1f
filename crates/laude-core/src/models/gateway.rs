// Wire types for the /api/auth/* endpoints.

use serde::{Deserialize, Serialize};

use super::{parse_expiry, Session, UserProfile};

/// New account request (`POST /api/auth/register`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub email: String,
    pub full_name: String,
    pub department: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct OtpRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct OtpVerification<'a> {
    pub email: &'a str,
    pub otp_code: &'a str,
}

/// Generic `{success, message}` envelope most auth endpoints return.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Ack {
    pub success: Option<bool>,
    pub message: Option<String>,
}

/// Response to `POST /api/auth/generate-otp`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OtpIssued {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
    /// Validity window the gateway advertises for the code, when it does.
    pub expires_in_minutes: Option<i64>,
}

/// `user_data` block of a successful OTP verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayUserData {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub session_expires: String,
}

/// Response to `POST /api/auth/verify-otp`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifiedLogin {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
    pub session_token: String,
    pub user_data: GatewayUserData,
}

impl VerifiedLogin {
    /// Build the session this login grants.
    /// `None` when the advertised expiry cannot be parsed.
    pub fn into_session(self) -> Option<Session> {
        let expires_at = parse_expiry(&self.user_data.session_expires)?;
        Some(Session::new(
            self.session_token,
            self.user_data.profile,
            expires_at,
        ))
    }
}
