use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::coordinator::RefreshCoordinator;
use super::events::{EventBus, SessionEvent};
use super::failure::FailureHandler;
use super::header::AuthHeaderProvider;
use super::scheduler::RefreshScheduler;
use super::store::TokenStore;
use super::sync::{CrossTabSynchronizer, Visibility};
use super::token::{decode_claims, TokenInfo};
use super::transport::{HttpRefreshTransport, RefreshTransport};
use crate::clock::{Clock, TokioClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::storage::Storage;
use crate::util::lock;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    /// `start()` has not been called.
    Uninitialized,
    /// Started, but no token to look after.
    Idle,
    /// A timer is armed. `failed_attempts` counts the current failure streak.
    Scheduled { failed_attempts: u32 },
    /// A refresh exchange is in flight.
    Refreshing,
    /// Refresh failed too many times; terminal until the next sign-in.
    LoggedOut,
}

/// One tab's session: token store, refresh machinery and cross-tab listener.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use freshtoken::prelude::*;
///
/// # async fn example() -> freshtoken::error::Result<()> {
/// let config = SessionConfig::from_env();
/// let storage = Arc::new(MemoryStorage::new().tab());
/// let session = SessionManager::over_http(config, storage)?;
/// session.start();
///
/// let client = reqwest::Client::new();
/// let request = client.get("https://api.example.com/me");
/// let _response = session.header_provider().authorize(request).await.send().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    config: SessionConfig,
    storage: Arc<dyn Storage>,
    store: Arc<TokenStore>,
    events: EventBus,
    failures: Arc<FailureHandler>,
    coordinator: Arc<RefreshCoordinator>,
    scheduler: Arc<RefreshScheduler>,
    synchronizer: Arc<CrossTabSynchronizer>,
    headers: AuthHeaderProvider,
    visibility: watch::Sender<Visibility>,
    started: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn RefreshTransport>,
    ) -> Self {
        let store = Arc::new(TokenStore::new(storage.clone(), clock.clone(), &config));
        let events = EventBus::default();
        let failures = Arc::new(FailureHandler::new(
            store.clone(),
            events.clone(),
            config.max_refresh_attempts,
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            transport,
            failures.clone(),
            events.clone(),
            config.refresh_timeout,
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            clock,
            store.clone(),
            coordinator.clone(),
            failures.clone(),
            &config,
        ));
        let halt = Arc::downgrade(&scheduler);
        failures.on_logout(move || {
            if let Some(scheduler) = halt.upgrade() {
                scheduler.stop();
            }
        });
        let synchronizer = Arc::new(CrossTabSynchronizer::new(
            store.clone(),
            scheduler.clone(),
            failures.clone(),
        ));
        let headers = AuthHeaderProvider::new(
            store.clone(),
            coordinator.clone(),
            failures.clone(),
            config.refresh_threshold,
        );
        let (visibility, _) = watch::channel(Visibility::Visible);

        Self {
            config,
            storage,
            store,
            events,
            failures,
            coordinator,
            scheduler,
            synchronizer,
            headers,
            visibility,
            started: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Session on the tokio clock refreshing against `config.refresh_endpoint`.
    pub fn over_http(config: SessionConfig, storage: Arc<dyn Storage>) -> Result<Self, SessionError> {
        config.validate()?;
        let transport = HttpRefreshTransport::new(&config.refresh_endpoint, config.refresh_timeout)?;
        Ok(Self::new(
            config,
            Arc::new(TokioClock::new()),
            storage,
            Arc::new(transport),
        ))
    }

    /// Arm the scheduler from the stored token and start listening to other tabs.
    ///
    /// Must be called inside a tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let armed = self.scheduler.start();
        tracing::debug!(armed, key = %self.config.storage_key, "Session started");
        let listener = self
            .synchronizer
            .attach(self.storage.subscribe(), self.visibility.subscribe());
        if let Some(previous) = lock(&self.listener).replace(listener) {
            previous.abort();
        }
    }

    /// Store a freshly issued token and begin a new session with it.
    pub fn sign_in(&self, token: &str) -> Result<(), SessionError> {
        decode_claims(token)?;
        self.coordinator.invalidate_then(|| self.store.persist(token))?;
        self.failures.reset();
        if self.is_started() {
            self.scheduler.start();
        }
        tracing::info!("Signed in");
        Ok(())
    }

    /// Stop scheduling, drop any in-flight refresh and clear stored credentials.
    pub fn sign_out(&self) -> Result<(), SessionError> {
        self.scheduler.stop();
        self.coordinator.invalidate_then(|| self.store.clear())?;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Tell the session whether its tab is visible.
    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }

    pub fn state(&self) -> SessionState {
        if !self.is_started() {
            SessionState::Uninitialized
        } else if self.failures.is_logged_out() {
            SessionState::LoggedOut
        } else if self.coordinator.is_refreshing() {
            SessionState::Refreshing
        } else if self.scheduler.is_running() {
            SessionState::Scheduled {
                failed_attempts: self.failures.attempts(),
            }
        } else {
            SessionState::Idle
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn header_provider(&self) -> &AuthHeaderProvider {
        &self.headers
    }

    pub fn token_info(&self) -> Option<TokenInfo> {
        self.store.token_info()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn synchronizer(&self) -> &Arc<CrossTabSynchronizer> {
        &self.synchronizer
    }

    pub fn failures(&self) -> &Arc<FailureHandler> {
        &self.failures
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.scheduler.stop();
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
    }
}
