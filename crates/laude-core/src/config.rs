//! Application configuration management.
//!
//! This module handles loading and saving the session configuration: the
//! gateway URL, the accepted corporate domain, expiry-watch timings and the
//! last email used to sign in.
//!
//! Configuration is stored at `~/.config/laude-agent/config.json`.
//! `LAUDE_API_URL` and `LAUDE_COMPANY_DOMAIN` override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "laude-agent";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Directory under the data dir holding the persisted session
const SESSION_DIR: &str = "session";

/// Accepted corporate email domain
pub const DEFAULT_COMPANY_DOMAIN: &str = "hssmedicine.com";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8001";

/// Expiry check period
const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// Sessions within this window of expiry get a one-time warning
const DEFAULT_WARNING_THRESHOLD_SECS: u64 = 5 * 60;

/// OTP validity when the gateway does not advertise one
const DEFAULT_OTP_VALIDITY_SECS: u64 = 10 * 60;

/// How often file/keyring stores are polled for other processes' writes
const DEFAULT_STORE_POLL_INTERVAL_SECS: u64 = 2;

/// Upper bound for timer periods; longer ones overflow tokio's clock
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub company_domain: String,
    pub tick_interval_secs: u64,
    pub warning_threshold_secs: u64,
    pub otp_validity_secs: u64,
    pub request_timeout_secs: u64,
    pub store_poll_interval_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            company_domain: DEFAULT_COMPANY_DOMAIN.to_string(),
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            warning_threshold_secs: DEFAULT_WARNING_THRESHOLD_SECS,
            otp_validity_secs: DEFAULT_OTP_VALIDITY_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            store_poll_interval_secs: DEFAULT_STORE_POLL_INTERVAL_SECS,
            last_email: None,
        }
    }
}

impl Config {
    /// Load from disk (defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("LAUDE_API_URL").ok(),
            std::env::var("LAUDE_COMPANY_DOMAIN").ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, domain: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(domain) = domain.filter(|d| !d.trim().is_empty()) {
            self.company_domain = domain.trim().trim_start_matches('@').to_lowercase();
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Default directory for the file-backed credential store.
    pub fn session_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(SESSION_DIR))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn warning_threshold(&self) -> chrono::Duration {
        seconds_or_default(self.warning_threshold_secs, DEFAULT_WARNING_THRESHOLD_SECS)
    }

    pub fn otp_validity(&self) -> chrono::Duration {
        seconds_or_default(self.otp_validity_secs, DEFAULT_OTP_VALIDITY_SECS)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_poll_interval(&self) -> Duration {
        Duration::from_secs(self.store_poll_interval_secs.clamp(1, MAX_INTERVAL_SECS))
    }
}

/// `secs` as a chrono duration, or `default_secs` when out of range.
fn seconds_or_default(secs: u64, default_secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(|| chrono::Duration::seconds(default_secs as i64))
}
