//! Laude Agent CLI - sign in to the Laude Agent gateway from a terminal.
//!
//! Drives the session core's `SessionManager`: OTP login, logout, status and
//! a long-running `watch` mode that follows expiry and logins or logouts made
//! from other terminals.

mod commands;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use laude_core::store::KeyValueBackend;
use laude_core::{
    Config, CredentialStore, FileBackend, GatewayClient, KeyringBackend, SessionManager,
    SessionSettings, SystemClock,
};

use commands::Command;

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix for watch mode
const LOG_FILE_PREFIX: &str = "laude.log";

const USAGE: &str = "\
Usage: laude [--store keyring|file] <command>

Commands:
  login [email]                          Sign in with a one-time code
  logout                                 Sign out on this machine
  status [--validate]                    Show the current session
  watch                                  Follow the session until it ends
  register <email> <full name> <dept>    Create an account";

/// Where the session token and profile are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    File,
    Keyring,
}

/// Initialize the tracing subscriber for logging.
///
/// Watch mode also writes a daily log file; the returned guard flushes it on drop.
fn init_tracing(log_to_file: bool) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir().filter(|_| log_to_file) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn log_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(laude_core::config::APP_NAME).join("logs"))
}

fn parse_args(args: &[String]) -> Result<(StoreKind, Command)> {
    let mut store = StoreKind::File;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--store" => {
                store = match iter.next().map(String::as_str) {
                    Some("file") => StoreKind::File,
                    Some("keyring") => StoreKind::Keyring,
                    other => bail!("--store expects 'file' or 'keyring', got {:?}", other),
                };
            }
            "-h" | "--help" => rest.push("help".to_string()),
            _ => rest.push(arg.clone()),
        }
    }

    let command = match rest.first().map(String::as_str) {
        Some("login") => Command::Login {
            email: rest.get(1).cloned(),
        },
        Some("logout") => Command::Logout,
        Some("status") => Command::Status {
            validate: rest.iter().skip(1).any(|a| a == "--validate"),
        },
        Some("watch") => Command::Watch,
        Some("register") => match &rest[1..] {
            [email, full_name, department] => Command::Register {
                email: email.clone(),
                full_name: full_name.clone(),
                department: department.clone(),
            },
            _ => bail!("register expects <email> <full name> <department>\n\n{}", USAGE),
        },
        Some("help") | None => Command::Help,
        Some(other) => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    Ok((store, command))
}

fn open_store(kind: StoreKind, config: &Config) -> Result<CredentialStore> {
    let backend: Arc<dyn KeyValueBackend> = match kind {
        StoreKind::File => {
            let backend = FileBackend::new(
                config
                    .session_dir()
                    .context("Failed to locate the session directory")?,
            );
            debug!(dir = %backend.dir().display(), "Using file credential store");
            Arc::new(backend)
        }
        StoreKind::Keyring => {
            debug!("Using OS keyring credential store");
            Arc::new(KeyringBackend::default())
        }
    };
    Ok(CredentialStore::with_backend(backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (store_kind, command) = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let _log_guard = init_tracing(command == Command::Watch);
    info!(command = command.name(), "Laude CLI starting");

    let mut config = Config::load().context("Failed to load config")?;
    let store = open_store(store_kind, &config)?;
    let gateway = GatewayClient::with_timeout(&config.api_base_url, config.request_timeout())
        .context("Failed to create HTTP client")?;
    let manager = SessionManager::new(
        store,
        gateway,
        Arc::new(SystemClock),
        SessionSettings::from(&config),
    );

    let result = commands::run(command, &manager, &mut config).await;
    manager.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        let (store, command) = parse_args(&args(&["login", "a@hssmedicine.com"])).unwrap();
        assert_eq!(store, StoreKind::File);
        assert_eq!(
            command,
            Command::Login {
                email: Some("a@hssmedicine.com".to_string())
            }
        );

        let (_, command) = parse_args(&args(&["status", "--validate"])).unwrap();
        assert_eq!(command, Command::Status { validate: true });

        let (_, command) = parse_args(&args(&[])).unwrap();
        assert_eq!(command, Command::Help);
    }

    #[test]
    fn test_parse_store_flag() {
        let (store, command) = parse_args(&args(&["--store", "keyring", "logout"])).unwrap();
        assert_eq!(store, StoreKind::Keyring);
        assert_eq!(command, Command::Logout);

        assert!(parse_args(&args(&["--store", "vault", "logout"])).is_err());
        assert!(parse_args(&args(&["--store"])).is_err());
    }

    #[test]
    fn test_parse_register() {
        let (_, command) = parse_args(&args(&[
            "register",
            "a@hssmedicine.com",
            "Avery Quinn",
            "Orthopedics",
        ]))
        .unwrap();
        assert_eq!(
            command,
            Command::Register {
                email: "a@hssmedicine.com".to_string(),
                full_name: "Avery Quinn".to_string(),
                department: "Orthopedics".to_string(),
            }
        );

        assert!(parse_args(&args(&["register", "a@hssmedicine.com"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }
}
