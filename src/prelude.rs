//! Convenience re-exports for common use.

pub use crate::auth::{
    AuthHeaderProvider, HttpRefreshTransport, RefreshResponse, RefreshTransport, SessionEvent,
    SessionManager, SessionState, TokenInfo, Visibility,
};
pub use crate::clock::{Clock, ManualClock, TokioClock};
pub use crate::config::SessionConfig;
pub use crate::error::{Result, SessionError};
pub use crate::storage::{FileStorage, MemoryStorage, Storage};
