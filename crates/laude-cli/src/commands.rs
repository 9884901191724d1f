//! Command implementations.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Result};
use chrono::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use laude_core::auth::otp;
use laude_core::models::Registration;
use laude_core::store::StoreWatcher;
use laude_core::utils::{format_countdown, format_expiry, format_remaining, mask_token};
use laude_core::{
    AuthError, Config, GatewayClient, SessionEvent, SessionManager, SessionState,
};

type Manager = SessionManager<GatewayClient>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    Status { validate: bool },
    Watch,
    Register {
        email: String,
        full_name: String,
        department: String,
    },
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::Logout => "logout",
            Command::Status { .. } => "status",
            Command::Watch => "watch",
            Command::Register { .. } => "register",
            Command::Help => "help",
        }
    }
}

pub async fn run(command: Command, manager: &Manager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => login(manager, config, email).await,
        Command::Logout => logout(manager).await,
        Command::Status { validate } => status(manager, validate).await,
        Command::Watch => watch(manager, config).await,
        Command::Register {
            email,
            full_name,
            department,
        } => register(manager, email, full_name, department).await,
        Command::Help => Ok(()),
    }
}

// ============================================================================
// Prompts
// ============================================================================

/// Read one line from stdin, falling back to `default` on empty input.
async fn prompt_line(label: &str, default: Option<String>) -> Result<String> {
    let prompt = match &default {
        Some(d) => format!("{} [{}]: ", label, d),
        None => format!("{}: ", label),
    };

    let line = tokio::task::spawn_blocking(move || -> io::Result<String> {
        print!("{}", prompt);
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await??;

    match (line.is_empty(), default) {
        (true, Some(default)) => Ok(default),
        (true, None) => bail!("{} is required", label),
        (false, _) => Ok(line),
    }
}

/// Read a code without echoing it.
async fn prompt_hidden(prompt: String) -> Result<String> {
    let input = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt)).await??;
    Ok(input.trim().to_string())
}

// ============================================================================
// Login
// ============================================================================

async fn login(manager: &Manager, config: &mut Config, email: Option<String>) -> Result<()> {
    if let Some(session) = manager.state().session() {
        println!(
            "Already signed in as {} ({} left)",
            session.profile.email,
            format_remaining(manager.remaining().unwrap_or_else(Duration::zero))
        );
        return Ok(());
    }

    let email = match email {
        Some(email) => email,
        None => prompt_line("Email", config.last_email.clone()).await?,
    };
    manager.request_code(&email).await?;

    let email = otp::normalize_email(&email)?;
    config.last_email = Some(email.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("A sign-in code was sent to {}", email);
    loop {
        let left = format_countdown(manager.otp_remaining().unwrap_or_else(Duration::zero));
        let input = prompt_hidden(format!(
            "Code ({} left, 'r' to resend, 'q' to quit): ",
            left
        ))
        .await?;

        match input.as_str() {
            "q" => {
                manager.cancel_login();
                println!("Sign-in cancelled");
                return Ok(());
            }
            "r" => match manager.resend_code().await {
                Ok(()) => println!("A new code was sent to {}", email),
                Err(AuthError::ResendTooSoon { remaining_secs }) => {
                    println!("You can request a new code in {}s", remaining_secs)
                }
                Err(e) => return Err(e.into()),
            },
            code => match manager.submit_code(code).await {
                Ok(()) => break,
                Err(e @ (AuthError::MalformedCode | AuthError::InvalidCode)) => {
                    eprintln!("{}", e)
                }
                Err(e @ AuthError::ExpiredCode) => {
                    eprintln!("{} Type 'r' for a new one.", e)
                }
                Err(e @ AuthError::TooManyAttempts) => {
                    manager.cancel_login();
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    match manager.state().session() {
        Some(session) => println!(
            "Welcome, {}! Signed in until {}",
            session.profile.first_name(),
            format_expiry(session.expires_at)
        ),
        None => println!("The server issued a session that has already expired"),
    }
    Ok(())
}

// ============================================================================
// Logout / status / register
// ============================================================================

async fn logout(manager: &Manager) -> Result<()> {
    match manager.profile() {
        Some(profile) => {
            manager.logout().await;
            println!("Signed out {}", profile.email);
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

async fn status(manager: &Manager, validate: bool) -> Result<()> {
    if validate && manager.state().is_authenticated() && !manager.revalidate().await {
        println!("The server no longer accepts this session; signed out");
        return Ok(());
    }

    print_state(manager, &manager.state());
    Ok(())
}

fn print_state(manager: &Manager, state: &SessionState) {
    match state {
        SessionState::Unauthenticated => println!("Not signed in"),
        SessionState::AwaitingOtp { email } => println!("Waiting for the code sent to {}", email),
        SessionState::Authenticated(session) | SessionState::ExpiringSoon { session, .. } => {
            let profile = &session.profile;
            println!("Signed in as {} <{}>", profile.full_name, profile.email);
            println!("  Department: {}", profile.department);
            println!("  Role:       {}", profile.role_display());
            println!("  Token:      {}", mask_token(&session.token));
            println!("  Expires:    {}", format_expiry(session.expires_at));
            println!(
                "  Remaining:  {}",
                format_remaining(manager.remaining().unwrap_or_else(Duration::zero))
            );
            if matches!(state, SessionState::ExpiringSoon { .. }) {
                println!("  Your session is about to expire. Sign in again to continue.");
            }
        }
    }
}

async fn register(
    manager: &Manager,
    email: String,
    full_name: String,
    department: String,
) -> Result<()> {
    let registration = Registration {
        email,
        full_name,
        department,
    };
    manager.register(&registration).await?;
    println!("Registered {}. Run `laude login` to sign in.", registration.email.trim());
    Ok(())
}

// ============================================================================
// Watch
// ============================================================================

async fn watch(manager: &Manager, config: &Config) -> Result<()> {
    let watcher = StoreWatcher::spawn(manager.store().clone(), config.store_poll_interval());
    let mut states = manager.subscribe_state();
    let mut events = manager.subscribe_events();

    print_state(manager, &manager.state());
    if !manager.state().is_authenticated() {
        println!("Waiting for a sign-in from another terminal (Ctrl-C to stop)");
    }

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(SessionEvent::Expired) => {
                    println!("Session expired. Sign in again to continue.");
                    break Ok(());
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event feed lagged"),
                Err(RecvError::Closed) => break Err(anyhow!("session manager stopped")),
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("session manager stopped"));
                }
                let state = states.borrow_and_update().clone();
                print_state(manager, &state);
            }
        }
    };

    watcher.stop();
    result
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ExpiryWarning { remaining } => {
            println!("Session expires in {}", format_remaining(*remaining))
        }
        SessionEvent::LoggedOut => println!("Signed out"),
        SessionEvent::ForcedLogout => println!("The server ended this session"),
        SessionEvent::SyncedFromStore => println!("Session changed in another terminal"),
        SessionEvent::LoggedIn { email } => println!("Signed in as {}", email),
        SessionEvent::CodeSent { email, valid_for } => {
            println!("Code sent to {} (valid {})", email, format_remaining(*valid_for))
        }
        SessionEvent::ProfileUpdated => println!("Profile updated"),
        SessionEvent::Expired => println!("Session expired"),
    }
}
