use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use super::events::{EventBus, SessionEvent};
use super::failure::FailureHandler;
use super::store::TokenStore;
use super::transport::{RefreshResponse, RefreshTransport};
use crate::util::lock;
use crate::util::timeout::with_timeout;

type PendingRefresh = Shared<BoxFuture<'static, bool>>;

struct InFlight {
    id: u64,
    pending: PendingRefresh,
}

/// Runs refresh exchanges, sharing one in-flight exchange among all callers.
pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    transport: Arc<dyn RefreshTransport>,
    failures: Arc<FailureHandler>,
    events: EventBus,
    timeout: Duration,
    /// Bumped on sign-out; exchanges started under an older epoch are discarded.
    /// Held while an exchange commits its result, so a commit and an
    /// invalidation never interleave.
    epoch: Mutex<u64>,
    next_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<TokenStore>,
        transport: Arc<dyn RefreshTransport>,
        failures: Arc<FailureHandler>,
        events: EventBus,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            failures,
            events,
            timeout,
            epoch: Mutex::new(0),
            next_id: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    /// Refresh the token, joining the in-flight exchange if there is one.
    ///
    /// Every caller that joins an exchange observes the same outcome. The
    /// exchange itself runs on its own task and completes even if all callers
    /// go away.
    pub async fn refresh(self: &Arc<Self>) -> bool {
        if self.failures.is_logged_out() {
            tracing::debug!("Session terminated; refusing to refresh");
            return false;
        }
        let pending = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!("Joining in-flight token refresh");
                    in_flight.pending.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let pending = self.spawn_exchange(id);
                    *slot = Some(InFlight {
                        id,
                        pending: pending.clone(),
                    });
                    pending
                }
            }
        };
        pending.await
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Discard the outcome of any exchange currently in flight and let the
    /// next caller start a new one.
    pub fn invalidate(&self) {
        self.invalidate_then(|| ());
    }

    /// Like [`invalidate`](Self::invalidate), then run `f` before any
    /// exchange can commit a result.
    pub fn invalidate_then<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut epoch = lock(&self.epoch);
        *epoch += 1;
        lock(&self.in_flight).take();
        f()
    }

    /// One exchange without de-duplication. Prefer [`refresh`](Self::refresh).
    pub async fn perform_refresh(&self) -> bool {
        let started = *lock(&self.epoch);
        let result = with_timeout(self.timeout, self.transport.exchange())
            .await
            .and_then(RefreshResponse::into_token);

        let epoch = lock(&self.epoch);
        if *epoch != started {
            tracing::debug!("Session stopped during refresh; discarding result");
            return false;
        }

        let token = match result {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh exchange failed");
                self.failures.record_failure();
                return false;
            }
        };
        if let Err(e) = self.store.persist(&token) {
            tracing::warn!(error = %e, "Failed to persist refreshed token");
            self.failures.record_failure();
            return false;
        }
        self.failures.record_success();
        tracing::info!("Token refreshed");
        self.events.emit(SessionEvent::TokenRefreshed { token });
        true
    }

    fn spawn_exchange(self: &Arc<Self>, id: u64) -> PendingRefresh {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = this.perform_refresh().await;
            let mut slot = lock(&this.in_flight);
            if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
                slot.take();
            }
            outcome
        });
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "Refresh task did not complete");
                    false
                }
            }
        }
        .boxed()
        .shared()
    }
}
