use chrono::Duration;

use crate::models::Session;

/// Where the session lifecycle currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    /// A code was sent to `email` and is waiting to be submitted.
    AwaitingOtp { email: String },
    Authenticated(Session),
    /// Entered once per session when it comes within the warning window.
    /// `remaining` is the time left at that moment.
    ExpiringSoon { session: Session, remaining: Duration },
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) | SessionState::ExpiringSoon { session, .. } => {
                Some(session)
            }
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    pub fn awaiting_email(&self) -> Option<&str> {
        match self {
            SessionState::AwaitingOtp { email } => Some(email),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::AwaitingOtp { .. } => "awaiting-otp",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::ExpiringSoon { .. } => "expiring-soon",
        }
    }

    /// Same variant, with the session swapped for `session`.
    pub(crate) fn with_session(&self, session: Session) -> SessionState {
        match self {
            SessionState::ExpiringSoon { remaining, .. } => SessionState::ExpiringSoon {
                session,
                remaining: *remaining,
            },
            _ => SessionState::Authenticated(session),
        }
    }
}

/// One-off notifications for the front end (toasts, banners).
/// Steady state is read from the state channel instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    CodeSent { email: String, valid_for: Duration },
    LoggedIn { email: String },
    ExpiryWarning { remaining: Duration },
    Expired,
    LoggedOut,
    /// The transport reported a 401, or revalidation failed
    ForcedLogout,
    /// State changed to match a write made by another tab
    SyncedFromStore,
    ProfileUpdated,
}
