//! Selector cache
//!
//! Maps a cache key (one per page region a source extracts from) to the
//! selector located for it on an earlier call. The cache is never
//! authoritative: a stale selector costs one failed scoped extraction,
//! after which the caller deletes the entry and extracts the full page.
//!
//! Entries can be loaded from and flushed to a JSON file so selectors
//! survive across runs.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    selector: String,
    stored_at: DateTime<Utc>,
}

/// Thread-safe key to selector store.
///
/// Individual get/set/delete calls are atomic; concurrent writers to the
/// same key race benignly (last write wins).
#[derive(Debug, Default)]
pub struct SelectorCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
}

impl SelectorCache {
    /// Create an empty cache whose entries never expire
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - entry.stored_at > ttl,
            Err(_) => false,
        }
    }

    /// Get the selector for a key, if present and not expired
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !self.is_expired(entry, now) => {
                    debug!(key, "Selector cache hit");
                    return Some(entry.selector.clone());
                }
                Some(_) => {}
            }
        }

        // A set may have replaced the entry since the read lock was dropped
        let mut entries = self.entries.write().await;
        self.evict_if_expired(&mut entries, key, now)
    }

    /// Remove `key` only if the entry stored now is expired; otherwise return it
    fn evict_if_expired(
        &self,
        entries: &mut HashMap<String, CacheEntry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        match entries.get(key) {
            Some(entry) if self.is_expired(entry, now) => {
                debug!(key, "Selector cache entry expired");
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.selector.clone()),
            None => None,
        }
    }

    /// Store a selector, replacing any previous one
    pub async fn set(&self, key: impl Into<String>, selector: impl Into<String>) {
        let entry = CacheEntry {
            selector: selector.into(),
            stored_at: Utc::now(),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Remove a selector; removing an absent key is a no-op
    pub async fn delete(&self, key: &str) {
        if self.entries.write().await.remove(key).is_some() {
            debug!(key, "Selector cache entry removed");
        }
    }

    /// Clear all cached entries
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Get the number of cached entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Merge entries from a JSON file into the cache.
    ///
    /// A missing file is an empty cache. An unreadable or corrupt file is
    /// logged and ignored. Returns the number of entries loaded.
    pub async fn load(&self, path: &Path) -> usize {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No selector cache file");
                return 0;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not read selector cache, starting empty"
                );
                return 0;
            }
        };

        let stored: HashMap<String, CacheEntry> = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt selector cache, starting empty");
                return 0;
            }
        };

        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let mut loaded = 0;
        for (key, entry) in stored {
            if !self.is_expired(&entry, now) {
                entries.insert(key, entry);
                loaded += 1;
            }
        }
        debug!(path = %path.display(), loaded, "Selector cache loaded");
        loaded
    }

    /// Write all entries to a JSON file, creating parent directories
    pub async fn flush(&self, path: &Path) -> Result<()> {
        let json = {
            let entries = self.entries.read().await;
            serde_json::to_vec_pretty(&*entries)?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Selector cache flushed");
        Ok(())
    }
}
