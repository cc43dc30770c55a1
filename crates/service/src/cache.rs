//! Local cache of the session's current business and property.
//!
//! Passive mirror with no authority: only the sync reconciler and explicit
//! session switches write to it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{fs, sync::RwLock};

use crate::errors::ServiceError;

/// Closed set of persisted keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalKey {
    #[serde(rename = "currentBusiness")]
    CurrentBusiness,
    #[serde(rename = "currentProperty")]
    CurrentProperty,
}

impl LocalKey {
    pub const ALL: [LocalKey; 2] = [LocalKey::CurrentBusiness, LocalKey::CurrentProperty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LocalKey::CurrentBusiness => "currentBusiness",
            LocalKey::CurrentProperty => "currentProperty",
        }
    }
}

impl fmt::Display for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub value: serde_json::Value,
    /// Remote `updated_at` this copy was last confirmed against.
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub local_updated_at: DateTime<Utc>,
    /// Local edit not yet confirmed by the remote store.
    pub pending: bool,
}

impl CachedRecord {
    /// A copy just read from (or confirmed by) the remote store.
    pub fn confirmed<T: Serialize>(value: &T, remote_updated_at: DateTime<Utc>) -> Result<Self, ServiceError> {
        Ok(Self {
            value: to_value(value)?,
            remote_updated_at: Some(remote_updated_at),
            local_updated_at: remote_updated_at,
            pending: false,
        })
    }

    /// A local edit waiting to be pushed.
    pub fn staged<T: Serialize>(value: &T, base: Option<DateTime<Utc>>) -> Result<Self, ServiceError> {
        Ok(Self { value: to_value(value)?, remote_updated_at: base, local_updated_at: Utc::now(), pending: true })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_value(self.value.clone()).map_err(|e| ServiceError::Internal(format!("cached value: {e}")))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Internal(e.to_string()))
}

#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn read(&self, key: LocalKey) -> Option<CachedRecord>;
    async fn write(&self, key: LocalKey, record: CachedRecord) -> Result<(), ServiceError>;
    /// Returns whether the key was present.
    async fn clear(&self, key: LocalKey) -> Result<bool, ServiceError>;

    async fn clear_all(&self) -> Result<(), ServiceError> {
        for key in LocalKey::ALL {
            self.clear(key).await?;
        }
        Ok(())
    }
}

/// Volatile cache, for tests and headless sessions.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<HashMap<LocalKey, CachedRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn read(&self, key: LocalKey) -> Option<CachedRecord> {
        self.inner.read().await.get(&key).cloned()
    }

    async fn write(&self, key: LocalKey, record: CachedRecord) -> Result<(), ServiceError> {
        self.inner.write().await.insert(key, record);
        Ok(())
    }

    async fn clear(&self, key: LocalKey) -> Result<bool, ServiceError> {
        Ok(self.inner.write().await.remove(&key).is_some())
    }
}

/// JSON file-backed cache.
///
/// Persists the whole key map on every mutation through a temp file and a
/// rename, so a crash never leaves a half-written file behind.
#[derive(Clone)]
pub struct JsonFileCache {
    inner: Arc<RwLock<HashMap<LocalKey, CachedRecord>>>,
    file_path: PathBuf,
}

impl JsonFileCache {
    /// Load from `path`, creating an empty file if missing. An unreadable
    /// file is treated as empty: the cache holds nothing authoritative.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, ServiceError> {
        let file_path = path.into();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::Internal(format!("cache dir {}: {e}", parent.display())))?;
        }

        let map: HashMap<LocalKey, CachedRecord> = match fs::read(&file_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        let cache = Self { inner: Arc::new(RwLock::new(map)), file_path };
        cache.save(&*cache.inner.read().await).await?;
        Ok(cache)
    }

    pub fn path(&self) -> &PathBuf { &self.file_path }

    async fn save(&self, map: &HashMap<LocalKey, CachedRecord>) -> Result<(), ServiceError> {
        let data = serde_json::to_vec_pretty(map).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let tmp = self.file_path.with_extension("json.tmp");
        fs::write(&tmp, data).await.map_err(|e| ServiceError::Internal(e.to_string()))?;
        fs::rename(&tmp, &self.file_path).await.map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LocalCache for JsonFileCache {
    async fn read(&self, key: LocalKey) -> Option<CachedRecord> {
        self.inner.read().await.get(&key).cloned()
    }

    async fn write(&self, key: LocalKey, record: CachedRecord) -> Result<(), ServiceError> {
        let mut map = self.inner.write().await;
        map.insert(key, record);
        self.save(&map).await
    }

    async fn clear(&self, key: LocalKey) -> Result<bool, ServiceError> {
        let mut map = self.inner.write().await;
        let existed = map.remove(&key).is_some();
        if existed {
            self.save(&map).await?;
        }
        Ok(existed)
    }
}
