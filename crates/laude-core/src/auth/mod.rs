//! Session lifecycle: OTP login, expiry watch and cross-tab sync.
//!
//! This module provides:
//! - `SessionManager`: the state machine front ends drive
//! - `SessionState` / `SessionEvent`: what front ends observe
//! - `AuthError`: one human-readable failure per rejected action
//! - `otp`: local email/code checks and the resend countdown
//!
//! Sessions expire at the absolute time the gateway hands out. The manager
//! warns once inside the last five minutes and signs out at expiry.

pub mod error;
pub mod otp;
pub mod session;
pub mod state;
mod watch;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::AuthError;
pub use otp::OtpCountdown;
pub use session::{SessionManager, SessionSettings};
pub use state::{SessionEvent, SessionState};
