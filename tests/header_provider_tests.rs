mod session_support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use freshtoken::auth::{SessionEvent, SessionManager, SessionState};
use freshtoken::config::SessionConfig;
use freshtoken::error::SessionError;
use freshtoken::storage::{MemoryStorage, Storage, StorageChanges, TabStorage};
use pretty_assertions::assert_eq;
use reqwest::header::AUTHORIZATION;

use session_support::{
    fixed_clock, session, token_expiring_at, token_expiring_in, Reply, ScriptedTransport, T0_SECS,
};

#[tokio::test]
async fn fresh_token_is_returned_without_network() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let transport = ScriptedTransport::new([]);
    let session = session(&area, &clock, &transport);
    let token = token_expiring_in(&clock, 3600);
    session.sign_in(&token).unwrap();

    let provider = session.header_provider();
    assert_eq!(provider.ensure_valid_token().await, Some(token.clone()));
    let headers = provider.auth_header().await;
    assert_eq!(
        headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
        format!("Bearer {token}")
    );
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let renewed = token_expiring_at(T0_SECS + 3600);
    let transport = ScriptedTransport::gated([Reply::Issue(renewed.clone())]);
    let session = session(&area, &clock, &transport);
    let mut events = session.subscribe();
    session.sign_in(&token_expiring_in(&clock, -5)).unwrap();

    let provider = session.header_provider();
    let callers = (0..8).map(|_| provider.ensure_valid_token());
    let release = async {
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        transport.release();
    };
    let (tokens, ()) = tokio::join!(join_all(callers), release);

    assert_eq!(tokens, vec![Some(renewed.clone()); 8]);
    assert_eq!(transport.calls(), 1);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::TokenRefreshed { token: renewed }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_callers_share_one_failed_refresh() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let transport = ScriptedTransport::gated([Reply::Status(500)]);
    let session = session(&area, &clock, &transport);
    session.sign_in(&token_expiring_in(&clock, -5)).unwrap();

    let provider = session.header_provider();
    let callers = (0..8).map(|_| provider.ensure_valid_token());
    let release = async {
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        transport.release();
    };
    let (tokens, ()) = tokio::join!(join_all(callers), release);

    assert_eq!(tokens, vec![None; 8]);
    assert_eq!(transport.calls(), 1);
    assert_eq!(session.failures().attempts(), 1);
}

#[tokio::test]
async fn token_inside_threshold_is_refreshed_first() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let renewed = token_expiring_at(T0_SECS + 3600);
    let transport = ScriptedTransport::new([Reply::Issue(renewed.clone())]);
    let session = session(&area, &clock, &transport);
    session.sign_in(&token_expiring_in(&clock, 120)).unwrap();

    assert_eq!(
        session.header_provider().ensure_valid_token().await,
        Some(renewed)
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn failed_refresh_yields_empty_header() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let transport = ScriptedTransport::new([Reply::Status(401)]);
    let session = session(&area, &clock, &transport);
    session.sign_in(&token_expiring_in(&clock, -60)).unwrap();

    let headers = session.header_provider().auth_header().await;
    assert!(headers.is_empty());
    assert_eq!(session.failures().attempts(), 1);
}

#[tokio::test]
async fn missing_token_tries_refresh_cookie() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let renewed = token_expiring_at(T0_SECS + 900);
    let transport = ScriptedTransport::new([Reply::Issue(renewed.clone())]);
    let session = session(&area, &clock, &transport);

    assert_eq!(
        session.header_provider().ensure_valid_token().await,
        Some(renewed)
    );
}

#[tokio::test]
async fn authorize_attaches_bearer_header() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let transport = ScriptedTransport::new([]);
    let session = session(&area, &clock, &transport);
    let token = token_expiring_in(&clock, 3600);
    session.sign_in(&token).unwrap();

    let client = reqwest::Client::new();
    let request = session
        .header_provider()
        .authorize(client.get("http://localhost/api/me"))
        .await
        .build()
        .unwrap();
    assert_eq!(
        request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap(),
        format!("Bearer {token}")
    );
}

#[tokio::test]
async fn sign_out_discards_in_flight_refresh() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let transport = ScriptedTransport::gated([Reply::Issue(token_expiring_at(T0_SECS + 3600))]);
    let session = session(&area, &clock, &transport);
    let mut events = session.subscribe();
    session.sign_in(&token_expiring_in(&clock, -5)).unwrap();
    session.start();

    let sign_out = async {
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.state(), SessionState::Refreshing);
        session.sign_out().unwrap();
        transport.release();
    };
    let (token, ()) = tokio::join!(session.header_provider().ensure_valid_token(), sign_out);

    assert_eq!(token, None);
    assert_eq!(area.peek("auth_token"), None);
    assert_eq!(session.failures().attempts(), 0);
    assert_eq!(clock.pending_timers(), 0);
    assert!(events.try_recv().is_err());
}

/// Tab storage whose next token write blocks until told to proceed.
struct HeldTokenWrite {
    inner: TabStorage,
    armed: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    proceed: Mutex<mpsc::Receiver<()>>,
}

impl Storage for HeldTokenWrite {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        if key == "auth_token" && self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.proceed.lock().unwrap().recv();
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.inner.remove(key)
    }

    fn subscribe(&self) -> StorageChanges {
        self.inner.subscribe()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_out_during_token_write_leaves_storage_empty() {
    let area = MemoryStorage::new();
    let clock = fixed_clock();
    let transport = ScriptedTransport::new([Reply::Issue(token_expiring_at(T0_SECS + 3600))]);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let storage = Arc::new(HeldTokenWrite {
        inner: area.tab(),
        armed: AtomicBool::new(false),
        entered: Mutex::new(entered_tx),
        proceed: Mutex::new(proceed_rx),
    });
    let session = Arc::new(SessionManager::new(
        SessionConfig::default(),
        clock.clone(),
        storage.clone(),
        transport.clone(),
    ));
    session.sign_in(&token_expiring_in(&clock, -5)).unwrap();
    storage.armed.store(true, Ordering::SeqCst);

    let provider = session.header_provider().clone();
    let refresh = tokio::spawn(async move { provider.ensure_valid_token().await });
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // The refreshed token is being written; sign out before the write lands.
    let signing_out = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.sign_out())
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    proceed_tx.send(()).unwrap();

    signing_out.await.unwrap().unwrap();
    refresh.await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(area.peek("auth_token"), None);
    assert!(session.token_info().is_none());
}
