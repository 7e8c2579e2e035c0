use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Clock, TimerId, TimerTask};
use crate::util::lock;

/// Deterministic clock for tests and simulations.
///
/// Time only moves when [`ManualClock::advance`] is called; due timers run
/// inline, in deadline order, on the caller's task.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use freshtoken::clock::{Clock, ManualClock};
///
/// # tokio_test_block(async {
/// let clock = ManualClock::starting_now();
/// clock.set_timer(Duration::from_secs(30), Box::pin(async {}));
/// assert_eq!(clock.pending_timers(), 1);
/// clock.advance(Duration::from_secs(30)).await;
/// assert_eq!(clock.pending_timers(), 0);
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct ManualClock {
    state: Mutex<ManualState>,
}

struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    timers: BTreeMap<TimerId, PendingTimer>,
}

struct PendingTimer {
    deadline: DateTime<Utc>,
    task: TimerTask,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                next_id: 0,
                timers: BTreeMap::new(),
            }),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.state).timers.len()
    }

    /// Deadline of the earliest armed timer.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).timers.values().map(|t| t.deadline).min()
    }

    /// Move time forward by `by`, running every timer that comes due.
    ///
    /// Timers armed by a running task also run if they fall inside the window.
    pub async fn advance(&self, by: Duration) {
        let target = lock(&self.state).now + to_chrono(by);
        while let Some(task) = self.take_due(target) {
            task.await;
        }
        let mut state = lock(&self.state);
        if state.now < target {
            state.now = target;
        }
    }

    /// Jump straight to the next deadline and run that timer.
    ///
    /// Returns `false` when nothing is armed.
    pub async fn fire_next(&self) -> bool {
        let Some(deadline) = self.next_deadline() else {
            return false;
        };
        match self.take_due(deadline) {
            Some(task) => {
                task.await;
                true
            }
            None => false,
        }
    }

    fn take_due(&self, limit: DateTime<Utc>) -> Option<TimerTask> {
        let mut state = lock(&self.state);
        let (id, deadline) = state
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= limit)
            .min_by_key(|(id, t)| (t.deadline, **id))
            .map(|(id, t)| (*id, t.deadline))?;
        let timer = state.timers.remove(&id)?;
        if state.now < deadline {
            state.now = deadline;
        }
        Some(timer.task)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        lock(&self.state).now
    }

    fn set_timer(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = lock(&self.state);
        let id = TimerId(state.next_id);
        state.next_id += 1;
        let deadline = state.now + to_chrono(delay);
        state.timers.insert(id, PendingTimer { deadline, task });
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        lock(&self.state).timers.remove(&id);
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}
