#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use freshtoken::auth::{encode_unsigned, RefreshResponse, RefreshTransport, SessionManager, TokenClaims};
use freshtoken::clock::{Clock, ManualClock};
use freshtoken::config::SessionConfig;
use freshtoken::error::SessionError;
use freshtoken::storage::MemoryStorage;
use tokio::sync::Notify;

/// Start of every scripted timeline, on a whole second.
pub const T0_SECS: i64 = 1_700_000_000;

pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.timestamp_opt(T0_SECS, 0).single().expect("valid timestamp"),
    ))
}

/// Unsigned token whose `exp` is `secs` after the clock's current time.
pub fn token_expiring_in(clock: &ManualClock, secs: i64) -> String {
    token_expiring_at(clock.now().timestamp() + secs)
}

pub fn token_expiring_at(exp: i64) -> String {
    encode_unsigned(&TokenClaims {
        exp,
        iat: None,
        sub: Some("user-1".to_string()),
    })
    .expect("encode token")
}

/// One scripted reply from the refresh endpoint.
#[derive(Debug, Clone)]
pub enum Reply {
    Issue(String),
    Reject(&'static str),
    Status(u16),
}

/// Refresh transport that replays a script, then answers `503`.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    gated: AtomicBool,
    gate: Notify,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Like [`new`](Self::new), but every exchange waits for [`release`](Self::release).
    pub fn gated(script: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        let transport = Self::new(script);
        transport.gated.store(true, Ordering::SeqCst);
        transport
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().expect("script lock").push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl RefreshTransport for ScriptedTransport {
    async fn exchange(&self) -> Result<RefreshResponse, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        let reply = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Reply::Status(503));
        match reply {
            Reply::Issue(token) => Ok(RefreshResponse::issued(token)),
            Reply::Reject(error) => Ok(RefreshResponse::rejected(error)),
            Reply::Status(status) => Err(SessionError::Http { status }),
        }
    }
}

/// A session for one tab of `area`, on `clock`, with the default config.
pub fn session(
    area: &MemoryStorage,
    clock: &Arc<ManualClock>,
    transport: &Arc<ScriptedTransport>,
) -> SessionManager {
    session_with(SessionConfig::default(), area, clock, transport)
}

pub fn session_with(
    config: SessionConfig,
    area: &MemoryStorage,
    clock: &Arc<ManualClock>,
    transport: &Arc<ScriptedTransport>,
) -> SessionManager {
    SessionManager::new(
        config,
        clock.clone(),
        Arc::new(area.tab()),
        transport.clone(),
    )
}

/// Yield until `check` passes, giving spawned listeners a chance to run.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    check()
}

pub fn secs_after_t0(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(T0_SECS + secs, 0)
        .single()
        .expect("valid timestamp")
}
