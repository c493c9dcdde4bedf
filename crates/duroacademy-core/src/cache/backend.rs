//! Storage engines behind `CacheDb`.
//!
//! Any embedded key/value store works as long as it offers the two tables
//! described by [`CacheBackend`]. `FileBackend` keeps one JSON file per record
//! on disk; `MemoryBackend` keeps everything in process for tests and as a
//! fallback when the cache directory is unusable.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use super::entry::{CacheEntry, MetaEntry};

const VALUES_DIR: &str = "values";
const META_DIR: &str = "meta";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache record is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Two-table key/value store: cache entries and string metadata.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn put_entry(&self, entry: &CacheEntry) -> Result<(), CacheError>;
    /// Removing an absent key is not an error.
    async fn delete_entry(&self, key: &str) -> Result<(), CacheError>;
    async fn list_entries(&self) -> Result<Vec<CacheEntry>, CacheError>;
    async fn clear_entries(&self) -> Result<(), CacheError>;

    async fn get_meta(&self, key: &str) -> Result<Option<MetaEntry>, CacheError>;
    async fn put_meta(&self, entry: &MetaEntry) -> Result<(), CacheError>;
    async fn delete_meta(&self, key: &str) -> Result<(), CacheError>;
    async fn clear_meta(&self) -> Result<(), CacheError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
    meta: Mutex<HashMap<String, MetaEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }

    async fn clear_entries(&self) -> Result<(), CacheError> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<MetaEntry>, CacheError> {
        Ok(self.meta.lock().await.get(key).cloned())
    }

    async fn put_meta(&self, entry: &MetaEntry) -> Result<(), CacheError> {
        self.meta
            .lock()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_meta(&self, key: &str) -> Result<(), CacheError> {
        self.meta.lock().await.remove(key);
        Ok(())
    }

    async fn clear_meta(&self) -> Result<(), CacheError> {
        self.meta.lock().await.clear();
        Ok(())
    }
}

// ============================================================================
// File backend
// ============================================================================

/// One pretty-printed JSON file per record under `values/` and `meta/`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a cache rooted at `root`.
    pub async fn open(root: PathBuf) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(root.join(VALUES_DIR)).await?;
        tokio::fs::create_dir_all(root.join(META_DIR)).await?;
        Ok(Self { root })
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(VALUES_DIR).join(file_name(key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(file_name(key))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(path: &Path, record: &T) -> Result<(), CacheError> {
        let contents = serde_json::to_string_pretty(record)?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn remove(path: &Path) -> Result<(), CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_dir(dir: &Path) -> Result<(), CacheError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = entries.next_entry().await? {
            Self::remove(&item.path()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry: Option<CacheEntry> = Self::read_json(&self.value_path(key)).await?;
        Ok(entry.filter(|e| owned_by(key, &e.key)))
    }

    async fn put_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        Self::write_json(&self.value_path(&entry.key), entry).await
    }

    async fn delete_entry(&self, key: &str) -> Result<(), CacheError> {
        Self::remove(&self.value_path(key)).await
    }

    async fn list_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(self.root.join(VALUES_DIR)).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_json::<CacheEntry>(&path).await {
                Ok(Some(entry)) => out.push(entry),
                Ok(None) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable cache file");
                }
            }
        }
        Ok(out)
    }

    async fn clear_entries(&self) -> Result<(), CacheError> {
        Self::clear_dir(&self.root.join(VALUES_DIR)).await
    }

    async fn get_meta(&self, key: &str) -> Result<Option<MetaEntry>, CacheError> {
        let entry: Option<MetaEntry> = Self::read_json(&self.meta_path(key)).await?;
        Ok(entry.filter(|e| owned_by(key, &e.key)))
    }

    async fn put_meta(&self, entry: &MetaEntry) -> Result<(), CacheError> {
        Self::write_json(&self.meta_path(&entry.key), entry).await
    }

    async fn delete_meta(&self, key: &str) -> Result<(), CacheError> {
        Self::remove(&self.meta_path(key)).await
    }

    async fn clear_meta(&self) -> Result<(), CacheError> {
        Self::clear_dir(&self.root.join(META_DIR)).await
    }
}

/// A record read from `key`'s file must carry `key` itself. Anything else
/// is a file shared with another key and reads as a miss.
fn owned_by(key: &str, stored: &str) -> bool {
    if stored != key {
        debug!(key, stored, "Cache file holds a different key");
        return false;
    }
    true
}

/// Map an arbitrary key to a unique, filesystem-safe file name.
/// Anything outside `[a-z0-9_-]` is percent-encoded with uppercase hex, so
/// distinct keys never collide, even on case-insensitive filesystems.
fn file_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 5);
    for b in key.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_' {
            name.push(b as char);
        } else {
            let _ = write!(name, "%{:02X}", b);
        }
    }
    name.push_str(".json");
    name
}
