use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::failure::FailureHandler;
use super::scheduler::{RefreshScheduler, WakeOutcome};
use super::store::TokenStore;
use crate::storage::{StorageChange, StorageChanges};

/// Host visibility of the tab owning a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Keeps one tab's scheduler in step with writes made by other tabs.
pub struct CrossTabSynchronizer {
    store: Arc<TokenStore>,
    scheduler: Arc<RefreshScheduler>,
    failures: Arc<FailureHandler>,
}

impl CrossTabSynchronizer {
    pub fn new(
        store: Arc<TokenStore>,
        scheduler: Arc<RefreshScheduler>,
        failures: Arc<FailureHandler>,
    ) -> Self {
        Self {
            store,
            scheduler,
            failures,
        }
    }

    /// React to a write made by another tab.
    ///
    /// A new token replaces the local timer without any network call. A
    /// removed token stops local scheduling. A logged-out session stays
    /// logged out until it signs in again.
    pub fn handle_storage_change(&self, change: &StorageChange) {
        if change.key != self.store.key() {
            return;
        }
        match change.new_value.as_deref() {
            Some(value) if !value.is_empty() => {
                tracing::debug!(origin = change.origin, "Token updated by another tab");
                self.scheduler.stop();
                self.failures.reset_attempts();
                if self.failures.is_logged_out() {
                    tracing::debug!("Session logged out; waiting for sign-in");
                    return;
                }
                self.scheduler.start();
            }
            _ => {
                tracing::debug!(origin = change.origin, "Token removed by another tab");
                self.scheduler.stop();
            }
        }
    }

    /// Re-evaluate immediately when the tab becomes visible again.
    pub async fn handle_visibility(&self, visibility: Visibility) -> Option<WakeOutcome> {
        match visibility {
            Visibility::Visible => {
                if self.failures.is_logged_out() || self.store.raw_token().is_none() {
                    return None;
                }
                tracing::debug!("Tab visible; re-evaluating token");
                Some(self.scheduler.evaluate_now().await)
            }
            Visibility::Hidden => None,
        }
    }

    /// Drive this synchronizer from a storage subscription and a visibility
    /// channel until both sources close.
    pub fn attach(
        self: &Arc<Self>,
        mut changes: StorageChanges,
        mut visibility: watch::Receiver<Visibility>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut storage_open = true;
            let mut visibility_open = true;
            while storage_open || visibility_open {
                tokio::select! {
                    change = changes.recv(), if storage_open => match change {
                        Some(change) => this.handle_storage_change(&change),
                        None => storage_open = false,
                    },
                    changed = visibility.changed(), if visibility_open => match changed {
                        Ok(()) => {
                            let current = *visibility.borrow_and_update();
                            this.handle_visibility(current).await;
                        }
                        Err(_) => visibility_open = false,
                    },
                }
            }
            tracing::debug!("Cross-tab listener finished");
        })
    }
}
