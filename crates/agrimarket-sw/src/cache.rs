//! Cache storage.
//!
//! [`CacheStorage`] is the plain in-memory store (the `caches` global);
//! [`SharedCacheStorage`] wraps it in an async lock so concurrent handlers
//! can read and write, and adds the operations that need the network or the
//! filesystem.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use agrimarket_net::{Fetcher, Request, Response};
use bytes::Bytes;
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// Cache storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),

    #[error("Refusing to cache status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Failed to add {url}: {reason}")]
    AddFailed { url: String, reason: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Request method. Always `GET`.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.url.clone(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body().to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        Response::from_parts(
            self.url.clone(),
            status,
            headers,
            Bytes::copy_from_slice(&self.body),
        )
    }

    /// Approximate storage cost in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// A cache namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by request key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only GET requests ever match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if request.method != Method::GET {
            return None;
        }
        self.entries.get(&request.cache_key())
    }

    /// Delete the entry for a request.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&request.cache_key()).is_some()
    }

    /// All keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by this cache.
    pub fn size(&self) -> usize {
        self.entries.values().map(CacheEntry::size).sum()
    }

    fn entry_size(&self, key: &str) -> usize {
        self.entries.get(key).map(CacheEntry::size).unwrap_or(0)
    }
}

/// Cache storage (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    quota_bytes: Option<usize>,
}

impl CacheStorage {
    /// Create new cache storage without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage limited to `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            caches: HashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches.entry(name.to_string()).or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Bytes held across all caches.
    pub fn total_size(&self) -> usize {
        self.caches.values().map(Cache::size).sum()
    }

    /// Match a request in one cache.
    pub fn match_in(&self, name: &str, request: &Request) -> Option<&CacheEntry> {
        self.caches.get(name)?.match_request(request)
    }

    /// Store a response. Fails for non-GET requests, non-2xx responses, and
    /// when the quota would be exceeded.
    pub fn put(&mut self, name: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
        let entry = Self::checked_entry(request, response)?;
        self.put_all(name, vec![(request.cache_key(), entry)])
    }

    /// Store several entries, all or nothing. When a key appears more than
    /// once the last entry wins.
    pub fn put_all(&mut self, name: &str, entries: Vec<(String, CacheEntry)>) -> Result<(), CacheError> {
        let entries: HashMap<String, CacheEntry> = entries.into_iter().collect();

        if let Some(quota) = self.quota_bytes {
            let current = self.total_size();
            let replaced: usize = self
                .caches
                .get(name)
                .map(|cache| entries.iter().map(|(key, _)| cache.entry_size(key)).sum())
                .unwrap_or(0);
            let added: usize = entries.iter().map(|(_, entry)| entry.size()).sum();
            let needed = current - replaced + added;
            if needed > quota {
                return Err(CacheError::QuotaExceeded {
                    needed,
                    available: quota,
                });
            }
        }

        let cache = self.open(name);
        for (key, entry) in entries {
            cache.entries.insert(key, entry);
        }
        Ok(())
    }

    fn checked_entry(request: &Request, response: &Response) -> Result<CacheEntry, CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }
        if !response.ok() {
            return Err(CacheError::BadStatus {
                url: request.url.to_string(),
                status: response.status.as_u16(),
            });
        }
        Ok(CacheEntry::from_response(request, response))
    }
}

/// Persisted form of a [`CacheStorage`].
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    caches: Vec<Cache>,
}

/// Cache storage shared between concurrently running handlers.
#[derive(Debug, Clone, Default)]
pub struct SharedCacheStorage {
    inner: Arc<RwLock<CacheStorage>>,
}

impl SharedCacheStorage {
    pub fn new(storage: CacheStorage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    /// Create the cache if it does not exist.
    pub async fn open(&self, name: &str) {
        self.inner.write().await.open(name);
    }

    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.has(name)
    }

    pub async fn delete(&self, name: &str) -> bool {
        self.inner.write().await.delete(name)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.keys()
    }

    /// Number of entries in a cache (0 when it does not exist).
    pub async fn entry_count(&self, name: &str) -> usize {
        self.inner.read().await.get(name).map(Cache::len).unwrap_or(0)
    }

    /// Look a request up in one cache.
    pub async fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        self.inner
            .read()
            .await
            .match_in(name, request)
            .map(CacheEntry::to_response)
    }

    /// Store a response in a cache.
    pub async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.inner.write().await.put(name, request, response)
    }

    /// Delete every cache and return how many were removed.
    pub async fn clear(&self) -> usize {
        let mut storage = self.inner.write().await;
        let names = storage.keys();
        for name in &names {
            storage.delete(name);
        }
        names.len()
    }

    /// Fetch every URL and store the responses in `name`. Either all of them
    /// are stored or none is.
    pub async fn add_all(&self, name: &str, urls: &[Url], fetcher: &dyn Fetcher) -> Result<(), CacheError> {
        let fetches = urls.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = fetcher.fetch(request.clone()).await.map_err(|e| CacheError::AddFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            let entry = CacheStorage::checked_entry(&request, &response).map_err(|e| {
                CacheError::AddFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            Ok::<_, CacheError>((request.cache_key(), entry))
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();

        let mut storage = self.inner.write().await;
        storage.open(name);
        storage.put_all(name, entries)?;

        debug!(cache = name, count, "Added entries");
        Ok(())
    }

    /// Write every cache to a JSON file.
    pub async fn save(&self, path: &Path) -> Result<(), CacheError> {
        let json = {
            let storage = self.inner.read().await;
            let mut caches: Vec<Cache> = storage.caches.values().cloned().collect();
            caches.sort_by(|a, b| a.name.cmp(&b.name));
            serde_json::to_vec_pretty(&Snapshot { caches })
                .map_err(|e| CacheError::Snapshot(e.to_string()))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::Snapshot(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| CacheError::Snapshot(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), "Cache snapshot saved");
        Ok(())
    }

    /// Replace the storage contents with a snapshot file. A missing file
    /// leaves the storage empty.
    pub async fn load(&self, path: &Path) -> Result<usize, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot yet");
                return Ok(0);
            }
            Err(e) => return Err(CacheError::Snapshot(format!("{}: {e}", path.display()))),
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Snapshot(e.to_string()))?;

        let mut storage = self.inner.write().await;
        storage.caches.clear();
        let count = snapshot.caches.len();
        for cache in snapshot.caches {
            storage.caches.insert(cache.name.clone(), cache);
        }

        info!(path = %path.display(), caches = count, "Cache snapshot loaded");
        Ok(count)
    }
}
