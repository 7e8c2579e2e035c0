//! Key/value storage shared between tabs, with change notifications.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::{MemoryStorage, TabStorage};

use tokio::sync::broadcast;

use crate::error::SessionError;

/// Identifies the handle that performed a write.
pub type OriginId = u64;

/// A write observed on shared storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
    pub origin: OriginId,
}

/// Storage abstraction for the persisted token.
///
/// Like browser local storage, a handle never receives notifications for its
/// own writes; only writes made through other handles are delivered.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
    /// Subscribe to changes made by other handles.
    fn subscribe(&self) -> StorageChanges;
}

/// Stream of changes made by other handles.
pub struct StorageChanges {
    receiver: broadcast::Receiver<StorageChange>,
    own_origin: OriginId,
}

impl StorageChanges {
    pub(crate) fn new(receiver: broadcast::Receiver<StorageChange>, own_origin: OriginId) -> Self {
        Self {
            receiver,
            own_origin,
        }
    }

    /// Wait for the next foreign change. Returns `None` once the storage is gone.
    pub async fn recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.origin == self.own_origin => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Storage change listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if change.origin == self.own_origin => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;
