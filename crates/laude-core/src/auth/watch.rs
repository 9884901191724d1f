use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A cancellable periodic task bound to one session token.
///
/// The first callback runs one `period` after spawning; the owner performs
/// the on-entry check itself. Dropping the watch cancels the task.
pub(crate) struct ExpiryWatch {
    token: String,
    handle: JoinHandle<()>,
}

impl ExpiryWatch {
    pub(crate) fn spawn<F>(token: impl Into<String>, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if on_tick().is_break() {
                    break;
                }
            }
        });

        Self {
            token: token.into(),
            handle,
        }
    }

    /// Whether this watch is live for `token`.
    pub(crate) fn watches(&self, token: &str) -> bool {
        self.token == token && !self.handle.is_finished()
    }

    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ExpiryWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
