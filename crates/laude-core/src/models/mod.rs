//! Data models for the session core.
//!
//! - `Session`, `UserProfile`: the authenticated grant and who it belongs to
//! - Gateway wire types: `Registration`, `OtpIssued`, `VerifiedLogin`, `GatewayUserData`

pub mod gateway;
pub mod profile;
pub mod session;

pub use gateway::{GatewayUserData, OtpIssued, Registration, VerifiedLogin};
pub use profile::UserProfile;
pub use session::{parse_expiry, Session};
