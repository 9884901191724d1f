//! Session lifecycle manager.
//!
//! `SessionManager` drives OTP login, logout, expiry detection and cross-tab
//! synchronization on top of a `CredentialStore` and an `IdentityGateway`.
//!
//! State lives in a `watch` channel so front ends can re-render on change;
//! one-off notifications go out on a broadcast channel. The manager owns two
//! background tasks, the expiry watch and the store sync, and both stop when
//! the manager is shut down or its last handle is dropped.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::otp::{self, OtpCountdown};
use super::watch::ExpiryWatch;
use super::{AuthError, SessionEvent, SessionState};
use crate::api::IdentityGateway;
use crate::clock::Clock;
use crate::config::Config;
use crate::models::{Registration, Session, UserProfile};
use crate::store::{CredentialStore, StoreChange, StoreOrigin};

/// Buffer size for session events.
/// Events are sparse (a handful per session), 32 leaves plenty of room.
const EVENT_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Settings
// ============================================================================

/// Timings and policy the manager runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub company_domain: String,
    pub tick_interval: StdDuration,
    pub warning_threshold: Duration,
    pub otp_validity: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            company_domain: config.company_domain.clone(),
            tick_interval: config.tick_interval(),
            warning_threshold: config.warning_threshold(),
            otp_validity: config.otp_validity(),
        }
    }
}

// ============================================================================
// Busy flags
// ============================================================================

/// Per-kind in-flight markers. At most one request of each kind at a time.
#[derive(Default)]
struct BusyFlags {
    code_request: AtomicBool,
    submit: AtomicBool,
    logout: AtomicBool,
    register: AtomicBool,
}

/// Clears its flag when dropped, including when the owning future is cancelled.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, AuthError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(flag))
            .map_err(|_| AuthError::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Manager
// ============================================================================

struct Inner<G> {
    store: CredentialStore,
    gateway: G,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    countdown: Mutex<Option<OtpCountdown>>,
    /// Bumped whenever a login attempt or session ends; late gateway
    /// responses from an older generation are discarded.
    generation: AtomicU64,
    busy: BusyFlags,
    expiry_watch: Mutex<Option<ExpiryWatch>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl<G> Drop for Inner<G> {
    fn drop(&mut self) {
        if let Some(watch) = lock(&self.expiry_watch).take() {
            watch.cancel();
        }
        if let Some(task) = lock(&self.sync_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one tab's session lifecycle. Clones share the same manager.
pub struct SessionManager<G: IdentityGateway> {
    inner: Arc<Inner<G>>,
}

impl<G: IdentityGateway> Clone for SessionManager<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: IdentityGateway> SessionManager<G> {
    /// Create a manager and restore any persisted session.
    ///
    /// Must be called from within a Tokio runtime: the store sync task and,
    /// if a session is restored, the expiry watch are spawned here.
    pub fn new(
        store: CredentialStore,
        gateway: G,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let changes = store.subscribe();
        let origin = store.origin();

        let manager = Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                clock,
                settings,
                state,
                events,
                countdown: Mutex::new(None),
                generation: AtomicU64::new(0),
                busy: BusyFlags::default(),
                expiry_watch: Mutex::new(None),
                sync_task: Mutex::new(None),
            }),
        };

        let sync = tokio::spawn(Self::run_sync(
            Arc::downgrade(&manager.inner),
            changes,
            origin,
        ));
        *lock(&manager.inner.sync_task) = Some(sync);

        manager.restore();
        manager
    }

    // ===== Observation =====

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Bearer token for authenticated calls, if signed in.
    pub fn token(&self) -> Option<String> {
        self.inner.state.borrow().session().map(|s| s.token.clone())
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.inner.state.borrow().session().map(|s| s.profile.clone())
    }

    /// Time left on the current session, clamped at zero.
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        self.inner.state.borrow().session().map(|s| s.remaining(now))
    }

    /// Time left on the outstanding OTP, if one was requested.
    pub fn otp_remaining(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        lock(&self.inner.countdown).as_ref().map(|c| c.remaining(now))
    }

    /// Whether a resend would be accepted now.
    pub fn can_resend(&self) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.borrow().awaiting_email().is_some()
            && lock(&self.inner.countdown)
                .as_ref()
                .map_or(true, |c| c.can_resend(now))
    }

    // ===== Login =====

    /// Ask the gateway to email a code to `email`.
    pub async fn request_code(&self, email: &str) -> Result<(), AuthError> {
        let email = otp::normalize_email(email)?;
        otp::check_domain(&email, &self.inner.settings.company_domain)?;
        if self.inner.state.borrow().is_authenticated() {
            return Err(AuthError::InvalidState("already signed in"));
        }
        // Asking again for the pending email is a resend
        self.ensure_can_resend(&email)?;

        let _busy = BusyGuard::acquire(&self.inner.busy.code_request)?;
        self.issue_code(email).await
    }

    /// Request a fresh code for the pending email once the current one has run out.
    pub async fn resend_code(&self) -> Result<(), AuthError> {
        let email = self
            .inner
            .state
            .borrow()
            .awaiting_email()
            .map(str::to_string)
            .ok_or(AuthError::InvalidState("no code has been requested"))?;

        self.ensure_can_resend(&email)?;

        let _busy = BusyGuard::acquire(&self.inner.busy.code_request)?;
        self.issue_code(email).await
    }

    /// Refuse a new code for `email` while its current one is still valid.
    fn ensure_can_resend(&self, email: &str) -> Result<(), AuthError> {
        let now = self.inner.clock.now();
        match lock(&self.inner.countdown).as_ref() {
            Some(countdown) if countdown.email == email && !countdown.can_resend(now) => {
                Err(AuthError::ResendTooSoon {
                    remaining_secs: countdown.remaining(now).num_seconds().max(1),
                })
            }
            _ => Ok(()),
        }
    }

    async fn issue_code(&self, email: String) -> Result<(), AuthError> {
        let generation = self.generation();
        let issued = self
            .inner
            .gateway
            .generate_otp(&email)
            .await
            .map_err(|e| AuthError::from_gateway(e, &self.inner.settings.company_domain))?;

        if self.generation() != generation || self.inner.state.borrow().is_authenticated() {
            debug!(email = %email, "Discarding late OTP response");
            return Err(AuthError::Superseded);
        }

        let valid_for = issued
            .expires_in_minutes
            .filter(|m| *m > 0)
            .map(Duration::minutes)
            .unwrap_or(self.inner.settings.otp_validity);
        *lock(&self.inner.countdown) = Some(OtpCountdown::new(
            email.clone(),
            self.inner.clock.now(),
            valid_for,
        ));

        self.set_state(SessionState::AwaitingOtp {
            email: email.clone(),
        });
        info!(email = %email, valid_minutes = valid_for.num_minutes(), "OTP requested");
        self.emit(SessionEvent::CodeSent { email, valid_for });
        Ok(())
    }

    /// Exchange the emailed code for a session.
    pub async fn submit_code(&self, code: &str) -> Result<(), AuthError> {
        let code = otp::normalize_code(code)?;
        let email = self
            .inner
            .state
            .borrow()
            .awaiting_email()
            .map(str::to_string)
            .ok_or(AuthError::InvalidState("no code has been requested"))?;

        let _busy = BusyGuard::acquire(&self.inner.busy.submit)?;
        let generation = self.generation();

        let result = self.inner.gateway.verify_otp(&email, &code).await;

        let still_waiting = self.inner.state.borrow().awaiting_email() == Some(email.as_str());
        if self.generation() != generation || !still_waiting {
            debug!(email = %email, "Discarding late OTP verification");
            return Err(AuthError::Superseded);
        }

        let login = result.map_err(|e| {
            let now = self.inner.clock.now();
            let elapsed = lock(&self.inner.countdown)
                .as_ref()
                .is_some_and(|c| c.is_elapsed(now));
            let err = AuthError::from_verify(e, elapsed);
            info!(email = %email, error = %err, "OTP rejected");
            err
        })?;

        let session = login.into_session().ok_or_else(|| {
            warn!(email = %email, "Gateway returned an unparseable session expiry");
            AuthError::Gateway("the server returned an invalid session expiry".to_string())
        })?;

        self.inner.store.save(&session)?;
        *lock(&self.inner.countdown) = None;

        info!(email = %email, admin = session.profile.is_admin, "Login successful");
        self.enter_authenticated(session, SessionEvent::LoggedIn { email });
        Ok(())
    }

    /// Abandon a pending code and return to the sign-in screen.
    pub fn cancel_login(&self) {
        if self.inner.state.borrow().awaiting_email().is_none() {
            return;
        }
        self.bump_generation();
        *lock(&self.inner.countdown) = None;
        self.set_state(SessionState::Unauthenticated);
        debug!("Login cancelled");
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> Result<(), AuthError> {
        let email = otp::normalize_email(&registration.email)?;
        otp::check_domain(&email, &self.inner.settings.company_domain)?;
        let full_name = registration.full_name.trim();
        let department = registration.department.trim();
        if full_name.is_empty() {
            return Err(AuthError::MissingField("full name"));
        }
        if department.is_empty() {
            return Err(AuthError::MissingField("department"));
        }
        if self.inner.state.borrow().is_authenticated() {
            return Err(AuthError::InvalidState("already signed in"));
        }

        let _busy = BusyGuard::acquire(&self.inner.busy.register)?;
        let request = Registration {
            email: email.clone(),
            full_name: full_name.to_string(),
            department: department.to_string(),
        };
        self.inner
            .gateway
            .register(&request)
            .await
            .map_err(|e| AuthError::from_gateway(e, &self.inner.settings.company_domain))?;

        info!(email = %email, "Registration accepted");
        Ok(())
    }

    // ===== Logout and forced logout =====

    /// Sign out. Local state is cleared before the gateway is told; a failed
    /// remote logout is logged and otherwise ignored.
    pub async fn logout(&self) {
        let Ok(_busy) = BusyGuard::acquire(&self.inner.busy.logout) else {
            debug!("Logout already in progress");
            return;
        };

        let state = self.state();
        let Some(session) = state.session() else {
            // Abandons any login still in flight
            self.cancel_login();
            return;
        };

        self.end_session(SessionEvent::LoggedOut);
        info!(email = %session.profile.email, "Logged out");

        if let Err(e) = self.inner.gateway.logout(&session.token).await {
            warn!(error = %e, "Remote logout failed; local session already cleared");
        }
    }

    /// Hook for the transport layer: an authenticated call came back 401.
    pub fn handle_unauthorized(&self) {
        if !self.inner.state.borrow().is_authenticated() {
            return;
        }
        warn!("Gateway rejected the session token, signing out");
        self.end_session(SessionEvent::ForcedLogout);
    }

    // ===== Validation =====

    /// Ask the gateway whether `token` is still accepted.
    /// Gateway errors count as "not valid".
    pub async fn validate_session(&self, token: &str) -> bool {
        match self.inner.gateway.validate(token).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "Session validation failed");
                false
            }
        }
    }

    /// Validate the current session; destroy it if the gateway disagrees.
    pub async fn revalidate(&self) -> bool {
        let Some(token) = self.token() else {
            return false;
        };
        if self.validate_session(&token).await {
            return true;
        }
        // The session may have changed while we waited
        if self.token().as_deref() == Some(token.as_str()) {
            self.handle_unauthorized();
        }
        false
    }

    // ===== Profile =====

    /// Edit the signed-in user's profile and persist it. The token and expiry
    /// are unchanged.
    pub fn update_profile(
        &self,
        edit: impl FnOnce(&mut UserProfile),
    ) -> Result<UserProfile, AuthError> {
        let state = self.state();
        let mut session = state
            .session()
            .cloned()
            .ok_or(AuthError::InvalidState("not signed in"))?;
        edit(&mut session.profile);

        self.inner.store.save(&session)?;
        let profile = session.profile.clone();
        let token = session.token.clone();
        self.inner.state.send_if_modified(|current| {
            let same_session = current.session().is_some_and(|s| s.token == token);
            if same_session {
                *current = current.with_session(session);
            }
            same_session
        });

        debug!(email = %profile.email, "Profile updated");
        self.emit(SessionEvent::ProfileUpdated);
        Ok(profile)
    }

    // ===== Expiry =====

    /// Compare the current session against the clock and apply the result.
    pub fn check_expiry(&self) {
        let now = self.inner.clock.now();
        let state = self.state();
        let Some(session) = state.session() else {
            return;
        };

        if session.is_expired(now) {
            info!(email = %session.profile.email, "Session expired");
            self.end_session(SessionEvent::Expired);
            return;
        }

        let SessionState::Authenticated(session) = &state else {
            // Already warned for this session
            return;
        };
        if !session.is_expiring_soon(now, self.inner.settings.warning_threshold) {
            debug!(minutes_left = session.minutes_until_expiry(now), "Session checked");
            return;
        }

        let remaining = session.time_until_expiry(now);
        let token = session.token.clone();
        let warned = self.inner.state.send_if_modified(|current| {
            let session = match &*current {
                SessionState::Authenticated(s) if s.token == token => s.clone(),
                _ => return false,
            };
            *current = SessionState::ExpiringSoon { session, remaining };
            true
        });
        if warned {
            info!(seconds_left = remaining.num_seconds(), "Session expiring soon");
            self.emit(SessionEvent::ExpiryWarning { remaining });
        }
    }

    /// Stop background tasks. The session itself is left as is.
    pub fn shutdown(&self) {
        self.stop_watch();
        if let Some(task) = lock(&self.inner.sync_task).take() {
            task.abort();
        }
        debug!("Session manager shut down");
    }

    // ===== Cross-tab sync =====

    /// Bring this tab in line with the store after another tab wrote to it.
    /// Never calls the gateway.
    pub fn sync_from_store(&self) {
        let stored = match self.inner.store.read() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read credential store during sync");
                return;
            }
        };

        let now = self.inner.clock.now();
        let stored = match stored {
            Some(session) if session.is_expired(now) => {
                if let Err(e) = self.inner.store.clear() {
                    warn!(error = %e, "Failed to clear expired session from store");
                }
                None
            }
            other => other,
        };

        let state = self.state();
        match (state.session(), stored) {
            (None, Some(session)) => {
                info!(email = %session.profile.email, "Signed in from another tab");
                self.bump_generation();
                *lock(&self.inner.countdown) = None;
                self.enter_authenticated(session, SessionEvent::SyncedFromStore);
            }
            (Some(current), None) => {
                info!(email = %current.profile.email, "Signed out from another tab");
                self.stop_watch();
                self.bump_generation();
                self.set_state(SessionState::Unauthenticated);
                self.emit(SessionEvent::SyncedFromStore);
            }
            (Some(current), Some(session)) if current.token == session.token => {
                if *current != session {
                    debug!("Session details updated from another tab");
                    self.set_state(state.with_session(session));
                    self.emit(SessionEvent::SyncedFromStore);
                }
            }
            (Some(_), Some(session)) => {
                info!(email = %session.profile.email, "Adopting session written by another tab");
                self.bump_generation();
                self.enter_authenticated(session, SessionEvent::SyncedFromStore);
            }
            (None, None) => {}
        }
    }

    async fn run_sync(
        inner: Weak<Inner<G>>,
        mut changes: broadcast::Receiver<StoreChange>,
        own: StoreOrigin,
    ) {
        loop {
            match changes.recv().await {
                Ok(change) if change.origin == own => continue,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Store change feed lagged, resyncing");
                }
                Err(RecvError::Closed) => break,
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            SessionManager { inner }.sync_from_store();
        }
    }

    // ===== Internals =====

    /// Load a persisted session on startup.
    fn restore(&self) {
        match self.inner.store.read() {
            Ok(Some(session)) if session.is_expired(self.inner.clock.now()) => {
                info!(email = %session.profile.email, "Persisted session has expired");
                if let Err(e) = self.inner.store.clear() {
                    warn!(error = %e, "Failed to clear expired session");
                }
            }
            Ok(Some(session)) => {
                info!(email = %session.profile.email, "Restored persisted session");
                self.set_state(SessionState::Authenticated(session.clone()));
                self.start_watch(&session.token);
                self.check_expiry();
            }
            Ok(None) => debug!("No persisted session"),
            Err(e) => warn!(error = %e, "Failed to read credential store"),
        }
    }

    fn enter_authenticated(&self, session: Session, event: SessionEvent) {
        let token = session.token.clone();
        self.set_state(SessionState::Authenticated(session));
        self.emit(event);
        self.start_watch(&token);
        self.check_expiry();
    }

    /// Tear down the current session: watch, store, state.
    fn end_session(&self, event: SessionEvent) {
        self.stop_watch();
        self.bump_generation();
        *lock(&self.inner.countdown) = None;
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear credential store");
        }
        self.set_state(SessionState::Unauthenticated);
        self.emit(event);
    }

    fn start_watch(&self, token: &str) {
        let mut slot = lock(&self.inner.expiry_watch);
        if slot.as_ref().is_some_and(|w| w.watches(token)) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let watched = token.to_string();
        let watch = ExpiryWatch::spawn(token, self.inner.settings.tick_interval, move || {
            let Some(inner) = weak.upgrade() else {
                return ControlFlow::Break(());
            };
            let manager = SessionManager { inner };
            if manager.token().as_deref() != Some(watched.as_str()) {
                return ControlFlow::Break(());
            }
            manager.check_expiry();
            ControlFlow::Continue(())
        });

        // Replacing the slot drops, and so cancels, any previous watch
        *slot = Some(watch);
    }

    fn stop_watch(&self) {
        if let Some(watch) = lock(&self.inner.expiry_watch).take() {
            watch.cancel();
        }
    }

    fn set_state(&self, state: SessionState) {
        debug!(state = state.name(), "Session state changed");
        self.inner.state.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}
