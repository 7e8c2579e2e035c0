//! freshtoken: keeps a short-lived bearer token fresh.
//!
//! A [`SessionManager`](auth::SessionManager) per tab refreshes the token
//! ahead of expiry, shares one refresh exchange among concurrent callers,
//! logs out after repeated failures and follows token writes made by other
//! tabs sharing the same storage.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use freshtoken::prelude::*;
//!
//! # async fn example() -> freshtoken::error::Result<()> {
//! let config = SessionConfig::load_layered(SessionConfig::default_config_path())?;
//! let session = SessionManager::over_http(config, Arc::new(FileStorage::new_default()))?;
//! session.start();
//!
//! let mut events = session.subscribe();
//! if let Some(token) = session.header_provider().ensure_valid_token().await {
//!     println!("bearer token valid: {}", token.len());
//! }
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod storage;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
