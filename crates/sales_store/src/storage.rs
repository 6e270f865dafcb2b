//! Durable key/value storage backing the persisted store state.
//!
//! `StateStorage` is a small string-keyed store (think browser local
//! storage). `FileStorage` keeps one JSON file per key; `MemoryStorage` is
//! the in-process fallback. `TypedStorage` layers `natura_`-prefixed typed
//! entries with optional expiry on top of either.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Prefix for typed helper entries.
pub const TYPED_PREFIX: &str = "natura_";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded: need {needed} bytes, quota is {quota}")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Corrupt entry '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Usage snapshot of a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub available: bool,
    pub used_bytes: u64,
    pub quota_bytes: Option<u64>,
    pub key_count: usize,
}

impl StorageInfo {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            used_bytes: 0,
            quota_bytes: None,
            key_count: 0,
        }
    }

    /// Fraction of the quota in use, when a quota is set.
    pub fn usage_ratio(&self) -> Option<f64> {
        self.quota_bytes
            .filter(|q| *q > 0)
            .map(|q| self.used_bytes as f64 / q as f64)
    }
}

/// String-keyed durable storage.
pub trait StateStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn quota_bytes(&self) -> Option<u64> {
        None
    }

    /// Bytes used by keys and values.
    fn used_bytes(&self) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for key in self.keys()? {
            let len = self.get_item(&key)?.map(|v| v.len()).unwrap_or(0);
            total += (key.len() + len) as u64;
        }
        Ok(total)
    }

    fn info(&self) -> StorageInfo {
        match (self.used_bytes(), self.keys()) {
            (Ok(used_bytes), Ok(keys)) => StorageInfo {
                available: true,
                used_bytes,
                quota_bytes: self.quota_bytes(),
                key_count: keys.len(),
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!("Storage usage unavailable: {}", e);
                StorageInfo::unavailable()
            }
        }
    }
}

fn check_quota(
    quota: Option<u64>,
    used: u64,
    old_len: u64,
    new_len: u64,
) -> Result<(), StorageError> {
    if let Some(quota) = quota {
        let needed = used.saturating_sub(old_len) + new_len;
        if needed > quota {
            return Err(StorageError::QuotaExceeded { needed, quota });
        }
    }
    Ok(())
}

// ── File-backed storage ───────────────────────────────────────────────

/// One `<key>.json` file per entry under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("File storage at {}", dir.display());
        Ok(Self { dir, quota: None })
    }

    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota = Some(quota_bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl StateStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if self.quota.is_some() {
            let old_len = self
                .get_item(key)?
                .map(|v| (key.len() + v.len()) as u64)
                .unwrap_or(0);
            check_quota(
                self.quota,
                self.used_bytes()?,
                old_len,
                (key.len() + value.len()) as u64,
            )?;
        }

        // Write-then-rename so a crash never leaves a half-written entry.
        let tmp = path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

// ── In-memory storage ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota: Some(quota_bytes),
        }
    }

    fn items(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))
    }
}

impl StateStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items()?;
        if self.quota.is_some() {
            let used: u64 = items.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
            let old_len = items
                .get(key)
                .map(|v| (key.len() + v.len()) as u64)
                .unwrap_or(0);
            check_quota(self.quota, used, old_len, (key.len() + value.len()) as u64)?;
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.items()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

// ── Typed helpers ─────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedEntry<T> {
    value: T,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Expiry-only view used when sweeping entries of unknown value type.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryExpiry {
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|at| now > at)
}

/// `natura_`-prefixed typed entries with optional time-to-live.
#[derive(Clone)]
pub struct TypedStorage {
    backend: Arc<dyn StateStorage>,
}

impl TypedStorage {
    pub fn new(backend: Arc<dyn StateStorage>) -> Self {
        Self { backend }
    }

    fn full_key(key: &str) -> String {
        format!("{}{}", TYPED_PREFIX, key)
    }

    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        let entry = TypedEntry {
            value,
            timestamp: now,
            expires_at,
        };
        let raw = serde_json::to_string(&entry)?;
        self.backend.set_item(&Self::full_key(key), &raw)
    }

    /// The stored value, or `None` when missing or expired. Expired
    /// entries are removed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let full_key = Self::full_key(key);
        let Some(raw) = self.backend.get_item(&full_key)? else {
            return Ok(None);
        };
        let entry: TypedEntry<T> =
            serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                key: full_key.clone(),
                source,
            })?;
        if is_expired(entry.expires_at, Utc::now()) {
            self.backend.remove_item(&full_key)?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove_item(&Self::full_key(key))
    }

    /// Remove expired and unreadable typed entries. Best effort: failures
    /// on individual keys are logged and skipped.
    pub fn cleanup_expired(&self) -> usize {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Storage cleanup skipped: {}", e);
                return 0;
            }
        };

        let now = Utc::now();
        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(TYPED_PREFIX)) {
            let stale = match self.backend.get_item(key) {
                Ok(Some(raw)) => match serde_json::from_str::<EntryExpiry>(&raw) {
                    Ok(entry) => is_expired(entry.expires_at, now),
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(e) => {
                    warn!("Storage cleanup could not read '{}': {}", key, e);
                    false
                }
            };
            if stale {
                match self.backend.remove_item(key) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Storage cleanup could not remove '{}': {}", key, e),
                }
            }
        }

        if removed > 0 {
            debug!("Storage cleanup removed {} expired entries", removed);
        }
        removed
    }

    /// Remove every typed entry.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.backend.keys()?;
        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(TYPED_PREFIX)) {
            self.backend.remove_item(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn info(&self) -> StorageInfo {
        self.backend.info()
    }
}
