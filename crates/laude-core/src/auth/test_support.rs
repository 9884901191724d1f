// In-memory identity gateway for manager tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::api::{ApiError, IdentityGateway};
use crate::models::{GatewayUserData, OtpIssued, Registration, UserProfile, VerifiedLogin};

pub(crate) const VALID_CODE: &str = "123456";
pub(crate) const ISSUED_TOKEN: &str = "tok-1";

/// Counts of calls made to each gateway operation.
#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub register: AtomicUsize,
    pub generate: AtomicUsize,
    pub verify: AtomicUsize,
    pub logout: AtomicUsize,
    pub validate: AtomicUsize,
}

impl Calls {
    pub(crate) fn total(&self) -> usize {
        [
            &self.register,
            &self.generate,
            &self.verify,
            &self.logout,
            &self.validate,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

/// Accepts only `VALID_CODE` and issues `ISSUED_TOKEN` with a configurable expiry.
#[derive(Debug)]
pub(crate) struct StubGateway {
    pub calls: Calls,
    session_expires: Mutex<String>,
    otp_window_minutes: Mutex<Option<i64>>,
    registered: Mutex<Vec<String>>,
    fail_generate: AtomicBool,
    fail_logout: AtomicBool,
    fail_validate: AtomicBool,
    token_valid: AtomicBool,
    verify_gate: Mutex<Option<Arc<Notify>>>,
}

impl StubGateway {
    pub(crate) fn new(session_expires: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            calls: Calls::default(),
            session_expires: Mutex::new(session_expires.to_rfc3339()),
            otp_window_minutes: Mutex::new(None),
            registered: Mutex::new(Vec::new()),
            fail_generate: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            fail_validate: AtomicBool::new(false),
            token_valid: AtomicBool::new(true),
            verify_gate: Mutex::new(None),
        })
    }

    pub(crate) fn set_session_expires(&self, at: DateTime<Utc>) {
        self.set_raw_session_expires(&at.to_rfc3339());
    }

    pub(crate) fn set_raw_session_expires(&self, raw: &str) {
        *lock(&self.session_expires) = raw.to_string();
    }

    pub(crate) fn set_otp_window(&self, minutes: Option<i64>) {
        *lock(&self.otp_window_minutes) = minutes;
    }

    pub(crate) fn fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_logout(&self, fail: bool) {
        self.fail_logout.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_validate(&self, fail: bool) {
        self.fail_validate.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_token_valid(&self, valid: bool) {
        self.token_valid.store(valid, Ordering::SeqCst);
    }

    /// Hold every `verify_otp` call until the returned `Notify` is signalled.
    pub(crate) fn gate_verify(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.verify_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn profile_for(email: &str) -> UserProfile {
        UserProfile {
            user_id: "42".to_string(),
            full_name: "Avery Quinn".to_string(),
            email: email.to_string(),
            department: "Orthopedics".to_string(),
            company_domain: "hssmedicine.com".to_string(),
            is_admin: false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IdentityGateway for StubGateway {
    async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        let mut registered = lock(&self.registered);
        if registered.contains(&registration.email) {
            return Err(ApiError::BadRequest("User already registered".to_string()));
        }
        registered.push(registration.email.clone());
        Ok(())
    }

    async fn generate_otp(&self, email: &str) -> Result<OtpIssued, ApiError> {
        self.calls.generate.fetch_add(1, Ordering::SeqCst);
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(ApiError::NotFound(
                "User not found. Please register first.".to_string(),
            ));
        }
        Ok(OtpIssued {
            success: true,
            message: Some(format!("OTP sent to {}", email)),
            expires_in_minutes: *lock(&self.otp_window_minutes),
        })
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<VerifiedLogin, ApiError> {
        self.calls.verify.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.verify_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if code != VALID_CODE {
            return Err(ApiError::BadRequest("Invalid or expired OTP".to_string()));
        }
        Ok(VerifiedLogin {
            success: true,
            message: Some("Login successful".to_string()),
            session_token: ISSUED_TOKEN.to_string(),
            user_data: GatewayUserData {
                profile: Self::profile_for(email),
                session_expires: lock(&self.session_expires).clone(),
            },
        })
    }

    async fn logout(&self, _token: &str) -> Result<(), ApiError> {
        self.calls.logout.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("logout unavailable".to_string()));
        }
        Ok(())
    }

    async fn validate(&self, token: &str) -> Result<bool, ApiError> {
        self.calls.validate.fetch_add(1, Ordering::SeqCst);
        if self.fail_validate.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("validation unavailable".to_string()));
        }
        Ok(token == ISSUED_TOKEN && self.token_valid.load(Ordering::SeqCst))
    }
}
