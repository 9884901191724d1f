//! Credential storage shared across tabs.
//!
//! This module provides:
//! - `KeyValueBackend`: the persistence seam, with memory, file and keyring backends
//! - `CredentialStore`: save/read/clear of the current session with change notification
//! - `StoreWatcher`: polling change detection for backends shared between processes
//!
//! The token and the profile record live under two separate keys. Reads
//! only return a session when both are present and decodable; anything else
//! is purged.

pub mod backend;
pub mod credentials;
pub mod error;
pub mod keychain;
pub mod watcher;

pub use backend::{FileBackend, KeyValueBackend, MemoryBackend};
pub use credentials::{CredentialStore, StoreChange, StoreChangeKind, StoreOrigin};
pub use error::StoreError;
pub use keychain::KeyringBackend;
pub use watcher::StoreWatcher;
