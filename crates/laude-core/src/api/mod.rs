//! Remote Identity Gateway access.
//!
//! This module provides the `IdentityGateway` contract the session manager
//! depends on, and `GatewayClient`, its HTTP implementation against the
//! `/api/auth/*` endpoints.
//!
//! Authenticated endpoints take a bearer token. A 401 from any of them
//! surfaces as `ApiError::Unauthorized`; callers hand that to
//! `SessionManager::handle_unauthorized`.

pub mod client;
pub mod error;
pub mod gateway;

pub use client::GatewayClient;
pub use error::ApiError;
pub use gateway::IdentityGateway;
