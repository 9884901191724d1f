use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{KeyValueBackend, StoreError};
use crate::models::{Session, UserProfile};

/// Key holding the raw bearer token
pub const TOKEN_KEY: &str = "laude.session_token";

/// Key holding the versioned profile record
pub const PROFILE_KEY: &str = "laude.user_profile";

/// Current profile record layout
const RECORD_VERSION: u32 = 1;

/// Wait before re-reading a token that has no profile record yet
const LONE_TOKEN_RECHECK_DELAY: Duration = Duration::from_millis(25);

/// Buffer size for store change notifications.
/// Subscribers only re-read the store on a change, so lagging is harmless.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Who wrote a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOrigin {
    /// A store handle in this process
    Handle(u64),
    /// Detected by polling; written by some other process
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChangeKind {
    Saved,
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub origin: StoreOrigin,
    pub kind: StoreChangeKind,
}

/// Summary of the raw stored values, for change detection by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    hash: u64,
    pub occupied: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileRecord {
    version: u32,
    profile: UserProfile,
    expires_at: DateTime<Utc>,
}

struct Shared {
    backend: Arc<dyn KeyValueBackend>,
    /// Serializes save/read/clear across every handle attached to this store
    lock: Mutex<()>,
    changes: broadcast::Sender<StoreChange>,
}

/// Persistence for the current session, shared by every attached handle.
///
/// Each handle acts as one tab: it has its own `origin`, sees every change
/// through `subscribe`, and can tell its own writes apart from others'.
/// Clones keep the same origin.
#[derive(Clone)]
pub struct CredentialStore {
    shared: Arc<Shared>,
    origin: StoreOrigin,
}

impl CredentialStore {
    pub fn new(backend: impl KeyValueBackend) -> Self {
        Self::with_backend(Arc::new(backend))
    }

    pub fn with_backend(backend: Arc<dyn KeyValueBackend>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                backend,
                lock: Mutex::new(()),
                changes,
            }),
            origin: StoreOrigin::Handle(rand::random()),
        }
    }

    /// Open another handle (a new tab) on the same storage and change feed.
    pub fn attach(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            origin: StoreOrigin::Handle(rand::random()),
        }
    }

    pub fn origin(&self) -> StoreOrigin {
        self.origin
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.shared.changes.subscribe()
    }

    /// Persist a session. The token is written before the profile record, so
    /// a concurrent reader never sees a profile without its token.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let record = serde_json::to_string(&ProfileRecord {
            version: RECORD_VERSION,
            profile: session.profile.clone(),
            expires_at: session.expires_at,
        })?;

        {
            let _guard = self.lock();
            self.shared.backend.set(TOKEN_KEY, &session.token)?;
            self.shared.backend.set(PROFILE_KEY, &record)?;
        }

        debug!(email = %session.profile.email, "Session saved to store");
        self.publish(StoreChangeKind::Saved);
        Ok(())
    }

    /// Load the persisted session.
    ///
    /// Returns `None` unless both entries are present and decode. Partial or
    /// corrupt state is removed before returning.
    ///
    /// A lone token is also what another process sees between the two writes
    /// of its `save`, so it is re-read once after `LONE_TOKEN_RECHECK_DELAY`
    /// before being purged. A writer slower than that still loses its login.
    pub fn read(&self) -> Result<Option<Session>, StoreError> {
        {
            let _guard = self.lock();
            let mut entries = self.entries()?;
            if matches!(entries, (Some(_), None)) {
                std::thread::sleep(LONE_TOKEN_RECHECK_DELAY);
                entries = self.entries()?;
            }

            let problem = match entries {
                (None, None) => return Ok(None),
                (Some(token), Some(record)) => match Self::decode(token, &record) {
                    Ok(session) => return Ok(Some(session)),
                    Err(problem) => problem,
                },
                (Some(_), None) => "token without profile record".to_string(),
                (None, Some(_)) => "profile record without token".to_string(),
            };

            warn!(problem = %problem, "Corrupt local session state, clearing");
            self.remove_entries()?;
        }

        self.publish(StoreChangeKind::Cleared);
        Ok(None)
    }

    /// Remove both entries. The profile goes first so that an interrupted
    /// clear leaves at most a lone token, which reads as absent.
    pub fn clear(&self) -> Result<(), StoreError> {
        {
            let _guard = self.lock();
            self.remove_entries()?;
        }
        debug!("Session cleared from store");
        self.publish(StoreChangeKind::Cleared);
        Ok(())
    }

    pub(crate) fn fingerprint(&self) -> Result<Fingerprint, StoreError> {
        let _guard = self.lock();
        let (token, record) = self.entries()?;

        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        record.hash(&mut hasher);
        Ok(Fingerprint {
            hash: hasher.finish(),
            occupied: token.is_some() || record.is_some(),
        })
    }

    pub(crate) fn publish_external(&self, kind: StoreChangeKind) {
        let _ = self.shared.changes.send(StoreChange {
            origin: StoreOrigin::External,
            kind,
        });
    }

    fn publish(&self, kind: StoreChangeKind) {
        // No subscribers is fine
        let _ = self.shared.changes.send(StoreChange {
            origin: self.origin,
            kind,
        });
    }

    /// Raw token and profile record.
    fn entries(&self) -> Result<(Option<String>, Option<String>), StoreError> {
        let token = self.shared.backend.get(TOKEN_KEY)?;
        let record = self.shared.backend.get(PROFILE_KEY)?;
        Ok((token, record))
    }

    fn remove_entries(&self) -> Result<(), StoreError> {
        self.shared.backend.remove(PROFILE_KEY)?;
        self.shared.backend.remove(TOKEN_KEY)?;
        Ok(())
    }

    fn decode(token: String, record: &str) -> Result<Session, String> {
        if token.trim().is_empty() {
            return Err("empty token".to_string());
        }
        let record: ProfileRecord =
            serde_json::from_str(record).map_err(|e| format!("undecodable profile record: {}", e))?;
        if record.version != RECORD_VERSION {
            return Err(format!("unsupported record version {}", record.version));
        }
        Ok(Session::new(token, record.profile, record.expires_at))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use chrono::Duration;

    fn session(token: &str) -> Session {
        Session::new(
            token,
            UserProfile {
                user_id: "u1".to_string(),
                full_name: "Avery Quinn".to_string(),
                email: "a@hssmedicine.com".to_string(),
                department: "Orthopedics".to_string(),
                company_domain: "hssmedicine.com".to_string(),
                is_admin: false,
            },
            Utc::now() + Duration::hours(8),
        )
    }

    /// Memory backend that records the order of writes.
    #[derive(Clone, Default)]
    struct RecordingBackend {
        inner: MemoryBackend,
        ops: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingBackend {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl KeyValueBackend for RecordingBackend {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.ops.lock().unwrap().push(format!("set {}", key));
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.ops.lock().unwrap().push(format!("remove {}", key));
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_save_then_read_returns_same_session() {
        let store = CredentialStore::new(MemoryBackend::new());
        let saved = session("tok-1");

        store.save(&saved).unwrap();
        assert_eq!(store.read().unwrap(), Some(saved));
    }

    #[test]
    fn test_read_empty_store() {
        let store = CredentialStore::new(MemoryBackend::new());
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn test_save_writes_token_before_profile_and_clear_removes_profile_first() {
        let backend = RecordingBackend::default();
        let store = CredentialStore::new(backend.clone());

        store.save(&session("tok-1")).unwrap();
        store.clear().unwrap();

        assert_eq!(
            backend.ops(),
            vec![
                format!("set {}", TOKEN_KEY),
                format!("set {}", PROFILE_KEY),
                format!("remove {}", PROFILE_KEY),
                format!("remove {}", TOKEN_KEY),
            ]
        );
    }

    #[test]
    fn test_missing_profile_reads_absent_and_heals() {
        let backend = MemoryBackend::new();
        let store = CredentialStore::new(backend.clone());
        store.save(&session("tok-1")).unwrap();

        backend.remove(PROFILE_KEY).unwrap();

        assert_eq!(store.read().unwrap(), None);
        assert_eq!(backend.get(TOKEN_KEY).unwrap(), None);
    }

    /// Hides the profile record from the first read, like another process
    /// that has renamed its token into place but not yet its record.
    #[derive(Clone, Default)]
    struct MidSaveBackend {
        inner: MemoryBackend,
        hidden_reads: Arc<Mutex<u32>>,
    }

    impl KeyValueBackend for MidSaveBackend {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let mut hidden = self.hidden_reads.lock().unwrap();
            if key == PROFILE_KEY && *hidden > 0 {
                *hidden -= 1;
                return Ok(None);
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_lone_token_rechecked_before_purge() {
        let backend = MidSaveBackend::default();
        let store = CredentialStore::new(backend.clone());
        let saved = session("tok-1");
        store.save(&saved).unwrap();

        *backend.hidden_reads.lock().unwrap() = 1;
        assert_eq!(store.read().unwrap(), Some(saved));
        assert_eq!(backend.inner.get(TOKEN_KEY).unwrap().as_deref(), Some("tok-1"));

        // Still missing on the second look: purged
        *backend.hidden_reads.lock().unwrap() = 2;
        assert_eq!(store.read().unwrap(), None);
        assert_eq!(backend.inner.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_missing_token_reads_absent_and_heals() {
        let backend = MemoryBackend::new();
        let store = CredentialStore::new(backend.clone());
        store.save(&session("tok-1")).unwrap();

        backend.remove(TOKEN_KEY).unwrap();

        assert_eq!(store.read().unwrap(), None);
        assert_eq!(backend.get(PROFILE_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_record_is_purged() {
        let backend = MemoryBackend::new();
        let store = CredentialStore::new(backend.clone());
        backend.set(TOKEN_KEY, "tok-1").unwrap();
        backend.set(PROFILE_KEY, "{not json").unwrap();

        assert_eq!(store.read().unwrap(), None);
        assert_eq!(backend.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(backend.get(PROFILE_KEY).unwrap(), None);
    }

    #[test]
    fn test_unknown_record_version_is_purged() {
        let backend = MemoryBackend::new();
        let store = CredentialStore::new(backend.clone());
        store.save(&session("tok-1")).unwrap();

        let record = backend.get(PROFILE_KEY).unwrap().unwrap();
        let bumped = record.replace("\"version\":1", "\"version\":99");
        backend.set(PROFILE_KEY, &bumped).unwrap();

        assert_eq!(store.read().unwrap(), None);
        assert_eq!(backend.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_clear_then_save_reads_saved_session() {
        let store = CredentialStore::new(MemoryBackend::new());
        store.save(&session("tok-old")).unwrap();

        let fresh = session("tok-new");
        store.clear().unwrap();
        store.save(&fresh).unwrap();

        assert_eq!(store.read().unwrap(), Some(fresh));
    }

    #[test]
    fn test_attached_handle_sees_changes_with_writer_origin() {
        let tab_a = CredentialStore::new(MemoryBackend::new());
        let tab_b = tab_a.attach();
        assert_ne!(tab_a.origin(), tab_b.origin());

        let mut rx = tab_b.subscribe();
        tab_a.save(&session("tok-1")).unwrap();
        tab_a.clear().unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.origin, tab_a.origin());
        assert_eq!(first.kind, StoreChangeKind::Saved);
        assert_eq!(rx.try_recv().unwrap().kind, StoreChangeKind::Cleared);

        // Shared storage
        assert_eq!(tab_b.read().unwrap(), None);
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let store = CredentialStore::new(MemoryBackend::new());
        let empty = store.fingerprint().unwrap();
        assert!(!empty.occupied);

        store.save(&session("tok-1")).unwrap();
        let saved = store.fingerprint().unwrap();
        assert!(saved.occupied);
        assert_ne!(empty, saved);
        assert_eq!(saved, store.fingerprint().unwrap());

        store.clear().unwrap();
        assert_eq!(store.fingerprint().unwrap(), empty);
    }
}
