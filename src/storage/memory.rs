use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::{OriginId, Storage, StorageChange, StorageChanges, CHANGE_CHANNEL_CAPACITY};
use crate::error::SessionError;
use crate::util::lock;

/// In-memory storage area shared by every tab of one profile.
///
/// Hand each tab its own [`TabStorage`] via [`MemoryStorage::tab`].
///
/// # Example
/// ```
/// use freshtoken::storage::{MemoryStorage, Storage};
///
/// let area = MemoryStorage::new();
/// let first = area.tab();
/// let second = area.tab();
/// let mut changes = second.subscribe();
///
/// first.set("auth_token", "a.b.c")?;
/// assert_eq!(second.get("auth_token")?.as_deref(), Some("a.b.c"));
/// assert_eq!(changes.try_recv().unwrap().new_value.as_deref(), Some("a.b.c"));
/// # Ok::<(), freshtoken::error::SessionError>(())
/// ```
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<SharedArea>,
}

struct SharedArea {
    values: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
    next_origin: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SharedArea {
                values: Mutex::new(HashMap::new()),
                changes,
                next_origin: AtomicU64::new(1),
            }),
        }
    }

    /// A new handle with its own origin.
    pub fn tab(&self) -> TabStorage {
        TabStorage {
            area: Arc::clone(&self.inner),
            origin: self.inner.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Read a value without going through a tab.
    pub fn peek(&self, key: &str) -> Option<String> {
        lock(&self.inner.values).get(key).cloned()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// One tab's view of a [`MemoryStorage`] area.
#[derive(Clone)]
pub struct TabStorage {
    area: Arc<SharedArea>,
    origin: OriginId,
}

impl TabStorage {
    pub fn origin(&self) -> OriginId {
        self.origin
    }

    fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        // No receivers is fine.
        let _ = self.area.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.origin,
        });
    }
}

impl Storage for TabStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(lock(&self.area.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let old = lock(&self.area.values).insert(key.to_string(), value.to_string());
        self.publish(key, old, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let old = lock(&self.area.values).remove(key);
        if old.is_some() {
            self.publish(key, old, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> StorageChanges {
        StorageChanges::new(self.area.changes.subscribe(), self.origin)
    }
}
