// Rate Limit Storage
// Typed key-value area holding one RateLimitRecord per action:identifier key

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Persisted attempt counter for one (action, identifier) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub lock_until: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitStoreError {
    #[error("Rate limit storage unavailable: {0}")]
    Unavailable(String),
    #[error("Rate limit storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt rate limit data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Backing store for the rate limiter.
///
/// Implementations are local and synchronous; the limiter treats every
/// error as "storage unavailable" and fails open.
pub trait RateLimitStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<RateLimitRecord>, RateLimitStoreError>;
    fn save(&self, key: &str, record: &RateLimitRecord) -> Result<(), RateLimitStoreError>;
    fn remove(&self, key: &str) -> Result<(), RateLimitStoreError>;
    /// Remove every key starting with `prefix`, returning how many were removed
    fn remove_prefixed(&self, prefix: &str) -> Result<usize, RateLimitStoreError>;
}

/// Process-local store, used by default and in tests
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate storage being unavailable (quota exceeded, private mode, ...)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .map(|records| records.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, RateLimitRecord>>, RateLimitStoreError>
    {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RateLimitStoreError::Unavailable(
                "storage disabled".to_string(),
            ));
        }
        self.records
            .lock()
            .map_err(|e| RateLimitStoreError::Unavailable(format!("poisoned lock: {}", e)))
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn load(&self, key: &str) -> Result<Option<RateLimitRecord>, RateLimitStoreError> {
        Ok(self.guard()?.get(key).cloned())
    }

    fn save(&self, key: &str, record: &RateLimitRecord) -> Result<(), RateLimitStoreError> {
        self.guard()?.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), RateLimitStoreError> {
        self.guard()?.remove(key);
        Ok(())
    }

    fn remove_prefixed(&self, prefix: &str) -> Result<usize, RateLimitStoreError> {
        let mut records = self.guard()?;
        let before = records.len();
        records.retain(|key, _| !key.starts_with(prefix));
        Ok(before - records.len())
    }
}

/// JSON file backed store; survives client restarts.
///
/// The whole map is rewritten on every mutation, which is fine for the
/// handful of keys a single client accumulates.
#[derive(Debug)]
pub struct FileRateLimitStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRateLimitStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, RateLimitRecord>, RateLimitStoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(
        &self,
        records: &HashMap<String, RateLimitRecord>,
    ) -> Result<(), RateLimitStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn locked<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, RateLimitStoreError>,
    ) -> Result<T, RateLimitStoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| RateLimitStoreError::Unavailable(format!("poisoned lock: {}", e)))?;
        f(self)
    }
}

impl RateLimitStore for FileRateLimitStore {
    fn load(&self, key: &str) -> Result<Option<RateLimitRecord>, RateLimitStoreError> {
        self.locked(|store| Ok(store.read_all()?.remove(key)))
    }

    fn save(&self, key: &str, record: &RateLimitRecord) -> Result<(), RateLimitStoreError> {
        self.locked(|store| {
            let mut records = store.read_all()?;
            records.insert(key.to_string(), record.clone());
            store.write_all(&records)
        })
    }

    fn remove(&self, key: &str) -> Result<(), RateLimitStoreError> {
        self.locked(|store| {
            let mut records = store.read_all()?;
            if records.remove(key).is_some() {
                store.write_all(&records)?;
            }
            Ok(())
        })
    }

    fn remove_prefixed(&self, prefix: &str) -> Result<usize, RateLimitStoreError> {
        self.locked(|store| {
            let mut records = store.read_all()?;
            let before = records.len();
            records.retain(|key, _| !key.starts_with(prefix));
            let removed = before - records.len();
            if removed > 0 {
                store.write_all(&records)?;
            }
            Ok(removed)
        })
    }
}
