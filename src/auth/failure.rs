use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::events::{EventBus, FailureReason, SessionEvent};
use super::store::TokenStore;
use crate::util::lock;

type LogoutHook = Arc<dyn Fn() + Send + Sync>;

/// Result of recording one failed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Below the limit; the scheduler should try again.
    Retry { attempts: u32 },
    /// The session has been terminated.
    LoggedOut,
}

/// Tracks consecutive refresh failures and performs the terminal logout.
pub struct FailureHandler {
    store: Arc<TokenStore>,
    events: EventBus,
    max_attempts: u32,
    attempts: AtomicU32,
    logged_out: AtomicBool,
    logout_hooks: Mutex<Vec<LogoutHook>>,
}

impl FailureHandler {
    pub fn new(store: Arc<TokenStore>, events: EventBus, max_attempts: u32) -> Self {
        Self {
            store,
            events,
            max_attempts: max_attempts.max(1),
            attempts: AtomicU32::new(0),
            logged_out: AtomicBool::new(false),
            logout_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Run `hook` whenever the session is terminated.
    pub fn on_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.logout_hooks).push(Arc::new(hook));
    }

    pub fn record_success(&self) {
        let previous = self.attempts.swap(0, Ordering::SeqCst);
        if previous > 0 {
            tracing::debug!(previous, "Refresh succeeded; failure counter reset");
        }
    }

    pub fn record_failure(&self) -> FailureOutcome {
        if self.is_logged_out() {
            return FailureOutcome::LoggedOut;
        }
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts < self.max_attempts {
            tracing::warn!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                "Token refresh failed; will retry"
            );
            return FailureOutcome::Retry { attempts };
        }
        self.terminate();
        FailureOutcome::LoggedOut
    }

    /// Clear the failure streak only, e.g. after another tab refreshed.
    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Leave the terminal state. Only a fresh sign-in should call this.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.logged_out.store(false, Ordering::SeqCst);
    }

    fn terminate(&self) {
        if self.logged_out.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(
            max_attempts = self.max_attempts,
            "Token refresh failed repeatedly; logging out"
        );
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "Failed to clear credentials during logout");
        }
        self.events.emit(SessionEvent::AuthenticationFailed {
            reason: FailureReason::TokenRefreshFailed,
        });
        let hooks: Vec<LogoutHook> = lock(&self.logout_hooks).clone();
        for hook in hooks {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::storage::{MemoryStorage, Storage};
    use std::sync::atomic::AtomicUsize;

    fn handler(area: &MemoryStorage, max: u32) -> (FailureHandler, EventBus) {
        let store = Arc::new(TokenStore::new(
            Arc::new(area.tab()),
            Arc::new(ManualClock::starting_now()),
            &SessionConfig::default(),
        ));
        let events = EventBus::default();
        (FailureHandler::new(store, events.clone(), max), events)
    }

    #[test]
    fn counts_up_to_the_limit_then_logs_out_once() {
        let area = MemoryStorage::new();
        let (failures, events) = handler(&area, 3);
        let mut rx = events.subscribe();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&hook_calls);
        failures.on_logout(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        area.tab().set("auth_token", "a.b.c").unwrap();

        assert_eq!(failures.record_failure(), FailureOutcome::Retry { attempts: 1 });
        assert_eq!(failures.record_failure(), FailureOutcome::Retry { attempts: 2 });
        assert_eq!(failures.record_failure(), FailureOutcome::LoggedOut);
        assert_eq!(failures.record_failure(), FailureOutcome::LoggedOut);

        assert!(failures.is_logged_out());
        assert_eq!(area.peek("auth_token"), None);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::AuthenticationFailed {
                reason: FailureReason::TokenRefreshFailed
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn success_breaks_the_streak() {
        let area = MemoryStorage::new();
        let (failures, _events) = handler(&area, 3);
        failures.record_failure();
        failures.record_success();
        assert_eq!(failures.record_failure(), FailureOutcome::Retry { attempts: 1 });
    }

    #[test]
    fn reset_leaves_terminal_state() {
        let area = MemoryStorage::new();
        let (failures, _events) = handler(&area, 1);
        assert_eq!(failures.record_failure(), FailureOutcome::LoggedOut);
        failures.reset();
        assert!(!failures.is_logged_out());
        assert_eq!(failures.attempts(), 0);
    }
}
