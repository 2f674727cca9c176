use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for the local cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("could not serialize cache value for {key}: {source}")]
    SerializeError {
        key: String,
        source: serde_json::Error,
    },
    #[error("could not write cache {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A stored value with an optional expiry (epoch milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now.timestamp_millis())
    }
}

/// Key → JSON value cache persisted to a single file (`board/.cache.json`).
///
/// An expired entry reads exactly like a missing one and is dropped on
/// access; `save` persists the removal.
#[derive(Debug)]
pub struct LocalCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl LocalCache {
    /// Open the cache file. A missing or malformed file yields an empty cache.
    pub fn open(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        LocalCache {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at<T: DeserializeOwned>(&mut self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            self.entries.remove(key);
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    pub fn set<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.set_at(key, value, ttl, Utc::now())
    }

    pub fn set_at<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::SerializeError {
            key: key.to_string(),
            source: e,
        })?;
        let expires_at = ttl.map(|ttl| now.timestamp_millis() + ttl.as_millis() as i64);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn save(&self) -> Result<(), CacheError> {
        let content =
            serde_json::to_string_pretty(&self.entries).map_err(|e| CacheError::SerializeError {
                key: "*".to_string(),
                source: e,
            })?;
        super::atomic_write(&self.path, content.as_bytes()).map_err(|e| CacheError::WriteError {
            path: self.path.clone(),
            source: e,
        })
    }
}
