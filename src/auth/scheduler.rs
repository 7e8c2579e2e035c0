use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::coordinator::RefreshCoordinator;
use super::failure::FailureHandler;
use super::store::TokenStore;
use super::token::TokenInfo;
use crate::clock::{Clock, TimerId};
use crate::config::SessionConfig;
use crate::util::lock;

/// What a single scheduler wake did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Not running, no token, or the session was terminated.
    Idle,
    /// Token still fresh; timer rearmed.
    Rescheduled { delay: Duration },
    /// A refresh was attempted.
    Refreshed { success: bool },
}

/// Keeps exactly one timer armed that re-evaluates token freshness.
pub struct RefreshScheduler {
    clock: Arc<dyn Clock>,
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    failures: Arc<FailureHandler>,
    threshold: Duration,
    min_interval: Duration,
    max_interval: Duration,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    timer: Option<TimerId>,
    next_wake: Option<DateTime<Utc>>,
}

impl RefreshScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        failures: Arc<FailureHandler>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            clock,
            store,
            coordinator,
            failures,
            threshold: config.refresh_threshold,
            min_interval: config.min_refresh_interval,
            max_interval: config.max_refresh_interval,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Wake delay for a token: its refresh lead time, clamped to the interval bounds.
    pub fn compute_delay(&self, info: &TokenInfo) -> Duration {
        let lead = info.time_until_expiry_millis - self.threshold.as_millis() as i64;
        let min = self.min_interval.as_millis() as i64;
        let max = self.max_interval.as_millis() as i64;
        Duration::from_millis(lead.clamp(min, max.max(min)) as u64)
    }

    pub fn needs_refresh(&self, info: &TokenInfo) -> bool {
        info.needs_refresh(self.threshold.as_millis() as i64)
    }

    /// Begin scheduling from the current token.
    ///
    /// A token already inside the refresh window gets an immediate wake.
    /// Returns `false` when there is nothing to schedule.
    pub fn start(self: &Arc<Self>) -> bool {
        lock(&self.state).running = true;
        self.schedule_from_store()
    }

    /// Cancel the armed timer and stop scheduling.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if let Some(id) = state.timer.take() {
            self.clock.cancel_timer(id);
        }
        if state.running {
            tracing::debug!("Refresh scheduler stopped");
        }
        state.running = false;
        state.next_wake = None;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// When the armed timer is due, if one is armed.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).next_wake
    }

    /// Cancel whatever is armed and schedule afresh from the stored token.
    pub fn reschedule(self: &Arc<Self>) -> bool {
        self.start()
    }

    /// Re-evaluate freshness right now instead of waiting for the timer.
    pub async fn evaluate_now(self: &Arc<Self>) -> WakeOutcome {
        if !self.is_running() {
            lock(&self.state).running = true;
        }
        self.wake().await
    }

    /// Timer callback: refresh if due, otherwise rearm.
    pub async fn wake(self: &Arc<Self>) -> WakeOutcome {
        {
            let mut state = lock(&self.state);
            if !state.running {
                return WakeOutcome::Idle;
            }
            if let Some(id) = state.timer.take() {
                self.clock.cancel_timer(id);
            }
            state.next_wake = None;
        }

        if self.failures.is_logged_out() {
            self.stop();
            return WakeOutcome::Idle;
        }
        let Some(info) = self.store.token_info() else {
            tracing::debug!("No usable token; scheduler going idle");
            self.stop();
            return WakeOutcome::Idle;
        };

        if !self.needs_refresh(&info) {
            let delay = self.compute_delay(&info);
            self.arm(delay);
            return WakeOutcome::Rescheduled { delay };
        }

        tracing::debug!(
            time_until_expiry_ms = info.time_until_expiry_millis,
            "Token inside refresh window; refreshing"
        );
        let success = self.coordinator.refresh().await;
        self.after_refresh(success);
        WakeOutcome::Refreshed { success }
    }

    fn after_refresh(self: &Arc<Self>, success: bool) {
        if !self.is_running() {
            return;
        }
        if !success && self.failures.is_logged_out() {
            self.stop();
            return;
        }
        match self.store.token_info() {
            Some(info) => {
                let delay = self.compute_delay(&info);
                if !success {
                    tracing::debug!(
                        attempt = self.failures.attempts(),
                        max_attempts = self.failures.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling refresh retry"
                    );
                }
                self.arm(delay);
            }
            None if success => self.stop(),
            // Nothing decodable to look at; keep retrying at the floor.
            None => self.arm(self.min_interval),
        }
    }

    fn schedule_from_store(self: &Arc<Self>) -> bool {
        if self.failures.is_logged_out() {
            self.stop();
            return false;
        }
        match self.store.token_info() {
            Some(info) if self.needs_refresh(&info) => {
                self.arm(Duration::ZERO);
                true
            }
            Some(info) => {
                self.arm(self.compute_delay(&info));
                true
            }
            None => {
                self.stop();
                false
            }
        }
    }

    fn arm(self: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(self);
        let task = Box::pin(async move {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.wake().await;
            }
        });
        let mut state = lock(&self.state);
        if !state.running {
            return;
        }
        if let Some(previous) = state.timer.take() {
            self.clock.cancel_timer(previous);
        }
        state.timer = Some(self.clock.set_timer(delay, task));
        state.next_wake =
            Some(self.clock.now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Refresh timer armed");
    }
}
