//! Display helpers shared by front ends.

pub mod format;

pub use format::{format_countdown, format_expiry, format_remaining, mask_token};
