//! CLI command handlers.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::{decode_claims, HttpRefreshTransport, SessionEvent, SessionManager, TokenInfo};
use crate::clock::TokioClock;
use crate::config::SessionConfig;
use crate::storage::file::FileStorageConfig;
use crate::storage::FileStorage;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Config file then environment, with an optional endpoint override.
pub fn load_config(
    path: Option<&Path>,
    endpoint: Option<&str>,
) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(SessionConfig::default_config_path);
    let mut config = SessionConfig::load_layered(path)?;
    if let Some(endpoint) = endpoint {
        config.refresh_endpoint = endpoint.to_string();
    }
    Ok(config)
}

pub fn open_storage(dir: Option<&Path>) -> FileStorage {
    match dir {
        Some(dir) => FileStorage::new(FileStorageConfig::new(dir.to_path_buf())),
        None => FileStorage::new_default(),
    }
}

/// One line describing how long a token has left.
pub fn describe_expiry(info: &TokenInfo) -> String {
    let expires = info
        .expires_at()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "out of range".to_string());
    let remaining = info.time_until_expiry_millis / 1000;
    if info.is_expired {
        format!("expired {}s ago (at {expires})", -remaining)
    } else {
        format!("valid for {remaining}s (until {expires})")
    }
}

/// Handle `freshtoken inspect <token>`.
pub fn handle_inspect(token: &str) -> CliResult {
    let claims = decode_claims(token)?;
    let info = TokenInfo::from_claims(token, &claims, Utc::now().timestamp_millis());

    println!("{}", serde_json::to_string_pretty(&claims)?);
    println!("{}", describe_expiry(&info));
    Ok(())
}

/// Handle `freshtoken status`.
pub fn handle_status(config: &SessionConfig, storage: FileStorage) -> CliResult {
    println!("🔐 Stored session ({})\n", storage.base_dir().display());
    let session = manager(config.clone(), storage, None)?;
    match session.token_info() {
        Some(info) => println!("  {}: ✅ {}", config.storage_key, describe_expiry(&info)),
        None => println!("  {}: ❌ No usable token", config.storage_key),
    }
    println!("  endpoint: {}", config.refresh_endpoint);
    Ok(())
}

/// Handle `freshtoken sign-in <token>`.
pub fn handle_sign_in(config: &SessionConfig, storage: FileStorage, token: &str) -> CliResult {
    let session = manager(config.clone(), storage, None)?;
    session.sign_in(token)?;
    if let Some(info) = session.token_info() {
        println!("✅ Token stored, {}", describe_expiry(&info));
    }
    Ok(())
}

/// Handle `freshtoken sign-out`.
pub fn handle_sign_out(config: &SessionConfig, storage: FileStorage) -> CliResult {
    manager(config.clone(), storage, None)?.sign_out()?;
    println!("✅ Signed out");
    Ok(())
}

/// Handle `freshtoken refresh`.
pub async fn handle_refresh(
    config: &SessionConfig,
    storage: FileStorage,
    cookie: Option<&str>,
) -> CliResult {
    let session = manager(config.clone(), storage, cookie)?;
    println!("⏳ Refreshing via {}", config.refresh_endpoint);
    if !session.coordinator().refresh().await {
        eprintln!("❌ Refresh failed");
        std::process::exit(1);
    }
    match session.token_info() {
        Some(info) => println!("✅ Refreshed, {}", describe_expiry(&info)),
        None => println!("✅ Refreshed"),
    }
    Ok(())
}

/// Handle `freshtoken watch`.
pub async fn handle_watch(
    config: &SessionConfig,
    storage: FileStorage,
    cookie: Option<&str>,
) -> CliResult {
    let session = manager(config.clone(), storage, cookie)?;
    let mut events = session.subscribe();
    session.start();
    println!("👀 Watching session ({}), Ctrl-C to stop", session.state());

    loop {
        tokio::select! {
            event = events.recv() => {
                if report_event(&session, event).is_break() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("👋 Stopped");
                return Ok(());
            }
        }
    }
}

/// Print one session event; `Break` once there is nothing left to watch.
fn report_event(
    session: &SessionManager,
    event: Result<SessionEvent, RecvError>,
) -> ControlFlow<()> {
    match event {
        Ok(SessionEvent::TokenRefreshed { .. }) => {
            match session.token_info() {
                Some(info) => println!("🔄 Token refreshed, {}", describe_expiry(&info)),
                None => println!("🔄 Token refreshed"),
            }
            ControlFlow::Continue(())
        }
        Ok(SessionEvent::AuthenticationFailed { reason }) => {
            println!("❌ Logged out: {reason}");
            ControlFlow::Break(())
        }
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Event listener lagged");
            ControlFlow::Continue(())
        }
        Err(RecvError::Closed) => ControlFlow::Break(()),
    }
}

fn manager(
    config: SessionConfig,
    storage: FileStorage,
    cookie: Option<&str>,
) -> Result<SessionManager, Box<dyn std::error::Error>> {
    config.validate()?;
    let mut transport = HttpRefreshTransport::new(&config.refresh_endpoint, config.refresh_timeout)?;
    if let Some(cookie) = cookie {
        transport = transport.with_refresh_cookie(cookie);
    }
    Ok(SessionManager::new(
        config,
        Arc::new(TokioClock::new()),
        Arc::new(storage),
        Arc::new(transport),
    ))
}
