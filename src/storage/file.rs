use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{OriginId, Storage, StorageChange, StorageChanges, CHANGE_CHANNEL_CAPACITY};
use crate::config::default_base_dir;
use crate::error::SessionError;

const ENTRY_FILE_VERSION: u32 = 1;

/// Configuration for file-backed storage.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    pub base_dir: PathBuf,
}

impl FileStorageConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_base_dir()
    }
}

/// File-backed storage, one TOML file per key.
///
/// Change notifications reach other handles created from the same area via
/// [`FileStorage::tab`]; writes from other processes are not observed.
///
/// # Example
/// ```no_run
/// use freshtoken::storage::{FileStorage, Storage};
///
/// let storage = FileStorage::new_default();
/// storage.set("auth_token", "header.payload.signature")?;
/// # Ok::<(), freshtoken::error::SessionError>(())
/// ```
#[derive(Clone)]
pub struct FileStorage {
    area: Arc<FileArea>,
    origin: OriginId,
}

struct FileArea {
    base_dir: PathBuf,
    changes: broadcast::Sender<StorageChange>,
    next_origin: AtomicU64,
}

impl FileStorage {
    pub fn new(config: FileStorageConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            area: Arc::new(FileArea {
                base_dir: config.base_dir,
                changes,
                next_origin: AtomicU64::new(2),
            }),
            origin: 1,
        }
    }

    pub fn new_default() -> Self {
        Self::new(FileStorageConfig::new(default_base_dir()))
    }

    /// Another handle on the same directory with its own origin.
    pub fn tab(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            origin: self.area.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.area.base_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.area
            .base_dir
            .join(format!("{}.toml", normalize_label(key)))
    }

    fn read_entry(&self, key: &str) -> Result<Option<String>, SessionError> {
        let path = self.entry_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SessionError::Storage(err.to_string())),
        };
        let entry: EntryFile = toml::from_str(&raw)?;
        Ok(Some(entry.value))
    }

    fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        let _ = self.area.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.origin,
        });
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.read_entry(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let old = self.read_entry(key).unwrap_or(None);
        let path = self.entry_path(key);
        ensure_parent(&path)?;
        let entry = EntryFile {
            version: ENTRY_FILE_VERSION,
            key: key.to_string(),
            value: value.to_string(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&entry)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        self.publish(key, old, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let old = self.read_entry(key).unwrap_or(None);
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.publish(key, old, None);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::Storage(err.to_string())),
        }
    }

    fn subscribe(&self) -> StorageChanges {
        StorageChanges::new(self.area.changes.subscribe(), self.origin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryFile {
    version: u32,
    key: String,
    value: String,
    saved_at: DateTime<Utc>,
}

fn ensure_parent(path: &Path) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let out: String = trimmed
        .chars()
        .map(|ch| {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() || lower == '-' || lower == '_' {
                lower
            } else {
                '-'
            }
        })
        .collect();
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_storage() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(FileStorageConfig::new(dir.path().to_path_buf()));
        (dir, storage)
    }

    #[test]
    fn value_round_trip_works() {
        let (_dir, storage) = temp_storage();
        storage.set("auth_token", "a.b.c").unwrap();
        assert_eq!(storage.get("auth_token").unwrap().as_deref(), Some("a.b.c"));
    }

    #[test]
    fn remove_clears_value_and_tolerates_missing() {
        let (_dir, storage) = temp_storage();
        storage.set("auth_token", "a.b.c").unwrap();
        storage.remove("auth_token").unwrap();
        assert!(storage.get("auth_token").unwrap().is_none());
        storage.remove("auth_token").unwrap();
    }

    #[test]
    fn sibling_handle_sees_changes() {
        let (_dir, storage) = temp_storage();
        let other = storage.tab();
        let mut changes = other.subscribe();
        let mut own = storage.subscribe();

        storage.set("auth_token", "t1").unwrap();

        assert_eq!(changes.try_recv().unwrap().new_value.as_deref(), Some("t1"));
        assert!(own.try_recv().is_none());
        assert_eq!(other.get("auth_token").unwrap().as_deref(), Some("t1"));
    }

    #[test]
    fn keys_are_normalized_to_safe_file_names() {
        let (dir, storage) = temp_storage();
        storage.set("../Auth Token", "x").unwrap();
        assert!(dir.path().join("---auth-token.toml").exists());
        assert_eq!(normalize_label("   "), "default");
    }

    #[cfg(unix)]
    #[test]
    fn entries_are_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, storage) = temp_storage();
        storage.set("auth_token", "secret").unwrap();
        let mode = fs::metadata(dir.path().join("auth_token.toml"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
