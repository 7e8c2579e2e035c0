//! Time and timer facilities injected into the session manager.

pub mod manual;

pub use manual::ManualClock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::util::lock;

/// Work to run when a timer fires.
pub type TimerTask = BoxFuture<'static, ()>;

/// Handle returned by [`Clock::set_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

/// Wall clock plus one-shot timers.
///
/// Cancelling a timer that already fired (or was already cancelled) is a
/// no-op. A timer whose task has started running is not interrupted.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    fn set_timer(&self, delay: Duration, task: TimerTask) -> TimerId;

    fn cancel_timer(&self, id: TimerId);
}

/// Production clock backed by the tokio timer wheel.
///
/// `now()` is anchored to the wall clock at construction and advanced by the
/// tokio monotonic clock, so paused-time tests see a consistent picture.
pub struct TokioClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
    timers: Arc<TimerTable>,
}

#[derive(Default)]
struct TimerTable {
    next_id: AtomicU64,
    handles: Mutex<HashMap<TimerId, JoinHandle<()>>>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_instant: tokio::time::Instant::now(),
            timers: Arc::new(TimerTable::default()),
        }
    }

    /// Number of timers armed and not yet fired.
    pub fn pending_timers(&self) -> usize {
        lock(&self.timers.handles).len()
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_instant.elapsed();
        self.anchor_wall + chrono::Duration::milliseconds(elapsed.as_millis() as i64)
    }

    fn set_timer(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = TimerId(self.timers.next_id.fetch_add(1, Ordering::Relaxed));
        let timers = Arc::clone(&self.timers);
        // Held across spawn so the task cannot observe the table before insert.
        let mut handles = lock(&self.timers.handles);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_armed = lock(&timers.handles).remove(&id).is_some();
            if still_armed {
                task.await;
            }
        });
        handles.insert(id, handle);
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        if let Some(handle) = lock(&self.timers.handles).remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.timers.handles).drain() {
            handle.abort();
        }
    }
}
