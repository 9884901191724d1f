use std::future::Future;
use std::sync::Arc;

use super::ApiError;
use crate::models::{OtpIssued, Registration, VerifiedLogin};

/// The Remote Identity Gateway as seen by the session manager.
///
/// The gateway owns OTP challenges and server-side sessions; the client
/// only ever holds the token it hands out.
pub trait IdentityGateway: Send + Sync + 'static {
    /// Create an account for a corporate email.
    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Issue a fresh OTP for `email`. Earlier codes for that email stop working.
    fn generate_otp(&self, email: &str) -> impl Future<Output = Result<OtpIssued, ApiError>> + Send;

    /// Exchange an OTP for a session.
    fn verify_otp(
        &self,
        email: &str,
        code: &str,
    ) -> impl Future<Output = Result<VerifiedLogin, ApiError>> + Send;

    /// Invalidate the server-side session behind `token`.
    fn logout(&self, token: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Whether the gateway still accepts `token`.
    fn validate(&self, token: &str) -> impl Future<Output = Result<bool, ApiError>> + Send;
}

impl<T: IdentityGateway> IdentityGateway for Arc<T> {
    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        (**self).register(registration)
    }

    fn generate_otp(&self, email: &str) -> impl Future<Output = Result<OtpIssued, ApiError>> + Send {
        (**self).generate_otp(email)
    }

    fn verify_otp(
        &self,
        email: &str,
        code: &str,
    ) -> impl Future<Output = Result<VerifiedLogin, ApiError>> + Send {
        (**self).verify_otp(email, code)
    }

    fn logout(&self, token: &str) -> impl Future<Output = Result<(), ApiError>> + Send {
        (**self).logout(token)
    }

    fn validate(&self, token: &str) -> impl Future<Output = Result<bool, ApiError>> + Send {
        (**self).validate(token)
    }
}
