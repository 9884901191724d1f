use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::credentials::Fingerprint;
use super::{CredentialStore, StoreChangeKind, StoreOrigin};

/// Polls a store for writes made by other processes and republishes them on
/// the store's change feed with `StoreOrigin::External`.
///
/// Writes made through any handle in this process move the baseline without
/// being republished. The task stops when the watcher is dropped.
pub struct StoreWatcher {
    handle: JoinHandle<()>,
}

impl StoreWatcher {
    pub fn spawn(store: CredentialStore, poll_interval: Duration) -> Self {
        let handle = tokio::spawn(Self::run(store, poll_interval));
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    async fn run(store: CredentialStore, poll_interval: Duration) {
        let mut local = store.subscribe();
        let mut baseline = Self::snapshot(&store);

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = Self::snapshot(&store);
                    if current.is_none() || current == baseline {
                        continue;
                    }
                    let kind = match current {
                        Some(Fingerprint { occupied: true, .. }) => StoreChangeKind::Saved,
                        _ => StoreChangeKind::Cleared,
                    };
                    debug!(?kind, "External store change detected");
                    baseline = current;
                    store.publish_external(kind);
                }
                change = local.recv() => match change {
                    Ok(change) if change.origin == StoreOrigin::External => {}
                    Ok(_) | Err(RecvError::Lagged(_)) => baseline = Self::snapshot(&store),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    fn snapshot(store: &CredentialStore) -> Option<Fingerprint> {
        match store.fingerprint() {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!(error = %e, "Failed to poll credential store");
                None
            }
        }
    }
}

impl Drop for StoreWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, UserProfile};
    use crate::store::backend::tests::scratch_dir;
    use crate::store::FileBackend;
    use chrono::{Duration as ChronoDuration, Utc};

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
            Utc::now() + ChronoDuration::hours(8),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_republishes_writes_from_another_process() {
        let dir = scratch_dir("watcher");
        // Two stores on the same directory stand in for two processes
        let ours = CredentialStore::new(FileBackend::new(&dir));
        let theirs = CredentialStore::new(FileBackend::new(&dir));

        let mut rx = ours.subscribe();
        let _watcher = StoreWatcher::spawn(ours.clone(), Duration::from_secs(2));
        tokio::task::yield_now().await;

        theirs.save(&session("tok-remote")).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let change = rx.recv().await.unwrap();
        assert_eq!(change.origin, StoreOrigin::External);
        assert_eq!(change.kind, StoreChangeKind::Saved);

        theirs.clear().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let change = rx.recv().await.unwrap();
        assert_eq!(change.origin, StoreOrigin::External);
        assert_eq!(change.kind, StoreChangeKind::Cleared);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_ignores_local_writes() {
        let dir = scratch_dir("watcher-local");
        let store = CredentialStore::new(FileBackend::new(&dir));

        let mut rx = store.subscribe();
        let _watcher = StoreWatcher::spawn(store.clone(), Duration::from_secs(2));
        tokio::task::yield_now().await;

        store.save(&session("tok-local")).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let change = rx.recv().await.unwrap();
        assert_eq!(change.origin, store.origin());
        assert!(rx.try_recv().is_err());

        let _ = std::fs::remove_dir_all(dir);
    }
}
