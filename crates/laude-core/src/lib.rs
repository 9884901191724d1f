//! Laude Agent session core.
//!
//! This crate implements the session lifecycle behind the Laude Agent front end:
//! - `store`: durable credential storage shared across tabs, with change notification
//! - `api`: the Remote Identity Gateway contract and its HTTP client
//! - `auth`: the session state machine, OTP countdown and expiry watch
//!
//! Front ends (the `laude` CLI, a web shell) drive a `SessionManager` and
//! re-render from its state channel.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod models;
pub mod store;
pub mod utils;

pub use api::{ApiError, GatewayClient, IdentityGateway};
pub use auth::{AuthError, SessionEvent, SessionManager, SessionSettings, SessionState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use models::{Session, UserProfile};
pub use store::{CredentialStore, FileBackend, KeyringBackend, MemoryBackend, StoreError};
