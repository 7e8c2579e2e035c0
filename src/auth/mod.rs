//! Bearer-token lifecycle: storage, refresh, scheduling and cross-tab sync.

pub mod coordinator;
pub mod events;
pub mod failure;
pub mod header;
pub mod manager;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod token;
pub mod transport;

pub use coordinator::RefreshCoordinator;
pub use events::{EventBus, FailureReason, SessionEvent};
pub use failure::{FailureHandler, FailureOutcome};
pub use header::AuthHeaderProvider;
pub use manager::{SessionManager, SessionState};
pub use scheduler::{RefreshScheduler, WakeOutcome};
pub use store::TokenStore;
pub use sync::{CrossTabSynchronizer, Visibility};
pub use token::{decode_claims, encode_unsigned, TokenClaims, TokenInfo};
pub use transport::{HttpRefreshTransport, RefreshResponse, RefreshTransport};
