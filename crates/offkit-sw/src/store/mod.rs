//! Cache Store.
//!
//! ```text
//! CacheStorage (caches)
//!     │
//!     ├── open(name) ──→ CacheHandle
//!     │                     ├── put(request, response)
//!     │                     └── match_request(request)
//!     ├── match_request(request, search order)
//!     ├── put_detached(name, key, response) ──→ settle()
//!     ├── rename(from, to)
//!     ├── delete(name)
//!     └── keys()
//!             │
//!             └── Arc<dyn CacheStore>   (MemoryStore | DiskStore)
//! ```
//!
//! Entries are only ever added, overwritten by key, or dropped together with
//! their whole cache. Writes to the same key are last-writer-wins.
//!
//! Detached writes belong to the storage, not to the worker version that
//! started them, so a version being superseded does not cancel its writes.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use offkit_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::error::{SwError, SwResult};

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

// ==================== Keys and entries ====================

/// Request identity: method plus URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn for_request(request: &Request) -> Self {
        Self {
            method: request.method.as_str().to_string(),
            url: request.url.as_str().to_string(),
        }
    }

    /// Key of a GET for `url`.
    pub fn get(url: &Url) -> Self {
        Self {
            method: Method::GET.as_str().to_string(),
            url: url.as_str().to_string(),
        }
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET.as_str()
    }

    /// Hex SHA-256 of the key, stable across runs.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored header, raw bytes preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,

    /// URL the response actually came from.
    pub response_url: Option<String>,

    pub status: u16,

    pub status_text: String,

    /// Headers in their original order, duplicates kept.
    pub headers: Vec<StoredHeader>,

    pub response_type: String,

    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under `key`.
    pub fn capture(key: RequestKey, response: &Response) -> Self {
        Self {
            key,
            response_url: response.url.as_ref().map(|u| u.as_str().to_string()),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| StoredHeader {
                    name: name.as_str().to_string(),
                    value: value.as_bytes().to_vec(),
                })
                .collect(),
            response_type: response.response_type.as_str().to_string(),
            body: response.body().to_vec(),
            cached_at: offkit_common::unix_millis(),
        }
    }

    /// Rebuild the response this entry was captured from.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(header.name.as_bytes()),
                HeaderValue::from_bytes(&header.value),
            ) {
                headers.append(name, value);
            }
        }

        Response::from_parts(
            self.response_url.as_deref().and_then(|u| Url::parse(u).ok()),
            self.status,
            self.status_text.clone(),
            headers,
            ResponseType::from_name(&self.response_type).unwrap_or(ResponseType::Basic),
            self.body.clone().into(),
        )
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ==================== Backend ====================

/// Storage backend for named caches.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the cache if it does not exist.
    async fn open(&self, name: &str) -> SwResult<()>;

    async fn has(&self, name: &str) -> SwResult<bool>;

    /// Insert or overwrite the entry under its key, creating the cache if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()>;

    async fn get(&self, name: &str, key: &RequestKey) -> SwResult<Option<CacheEntry>>;

    /// Keys stored in a cache; empty if the cache does not exist.
    async fn keys(&self, name: &str) -> SwResult<Vec<RequestKey>>;

    /// Drop a whole cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> SwResult<bool>;

    /// Replace cache `to` with cache `from`. Any previous `to` is dropped and
    /// `from` no longer exists afterwards. Fails if `from` does not exist.
    async fn rename(&self, from: &str, to: &str) -> SwResult<()>;

    /// All cache names, sorted.
    async fn names(&self) -> SwResult<Vec<String>>;
}

// ==================== Cache Storage ====================

/// Cache storage (caches global).
#[derive(Clone)]
pub struct CacheStorage {
    store: Arc<dyn CacheStore>,
    population: Arc<Mutex<JoinSet<()>>>,
}

impl fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}

impl CacheStorage {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            population: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Storage backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> SwResult<CacheHandle> {
        self.store.open(name).await?;
        Ok(CacheHandle {
            store: Arc::clone(&self.store),
            name: name.to_string(),
        })
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> SwResult<bool> {
        self.store.has(name).await
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> SwResult<bool> {
        self.store.delete(name).await
    }

    /// Get all cache names.
    pub async fn keys(&self) -> SwResult<Vec<String>> {
        self.store.names().await
    }

    /// Replace cache `to` with the contents of `from`.
    pub async fn rename(&self, from: &str, to: &str) -> SwResult<()> {
        self.store.rename(from, to).await
    }

    /// Store `response` in cache `name` on a detached task.
    ///
    /// Failures are logged and never reach the caller. The task keeps running
    /// after the caller is gone; [`CacheStorage::settle`] waits for it.
    pub fn put_detached(&self, name: &str, key: RequestKey, response: Response) {
        let cache = CacheHandle {
            store: Arc::clone(&self.store),
            name: name.to_string(),
        };

        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let name = cache.name();
            let result = async {
                cache.store.open(name).await?;
                cache.put_key(key.clone(), &response).await
            }
            .await;

            match result {
                Ok(()) => debug!(cache = %name, key = %key, "Stored detached write"),
                Err(e) => warn!(cache = %name, key = %key, error = %e, "Detached cache write failed"),
            }
        });
    }

    /// Wait for every detached write started so far, from any clone.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.tasks());
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Detached cache write did not complete");
            }
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.population.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Match a key across caches, in the given order.
    pub async fn match_key(&self, key: &RequestKey, order: &[&str]) -> SwResult<Option<Response>> {
        for name in order {
            if let Some(entry) = self.store.get(name, key).await? {
                return Ok(Some(entry.to_response()));
            }
        }
        Ok(None)
    }

    /// Match a request across caches, in the given order.
    pub async fn match_request(
        &self,
        request: &Request,
        order: &[&str],
    ) -> SwResult<Option<Response>> {
        self.match_key(&RequestKey::for_request(request), order).await
    }
}

/// An opened cache.
#[derive(Clone)]
pub struct CacheHandle {
    store: Arc<dyn CacheStore>,
    name: String,
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `response` under the request's identity. Only GET is storable.
    pub async fn put(&self, request: &Request, response: &Response) -> SwResult<()> {
        self.put_key(RequestKey::for_request(request), response).await
    }

    /// Store `response` under an explicit key.
    pub async fn put_key(&self, key: RequestKey, response: &Response) -> SwResult<()> {
        if !key.is_get() {
            return Err(SwError::cache(format!(
                "refusing to store non-GET request {key}"
            )));
        }
        self.store
            .put(&self.name, CacheEntry::capture(key, response))
            .await
    }

    /// Match a request in this cache only.
    pub async fn match_request(&self, request: &Request) -> SwResult<Option<Response>> {
        let key = RequestKey::for_request(request);
        Ok(self
            .store
            .get(&self.name, &key)
            .await?
            .map(|entry| entry.to_response()))
    }

    /// Get all keys.
    pub async fn keys(&self) -> SwResult<Vec<RequestKey>> {
        self.store.keys(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, SET_COOKIE};

    fn sample_response() -> Response {
        Response::new(200, "<html>cached</html>")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .with_header(SET_COOKIE, HeaderValue::from_static("a=1"))
            .with_header(SET_COOKIE, HeaderValue::from_static("b=2"))
            .with_type(ResponseType::Basic)
            .with_url(Url::parse("https://app.example/index.html").unwrap())
    }

    #[test]
    fn test_key_digest_is_stable_and_distinct() {
        let url = Url::parse("https://app.example/a").unwrap();
        let a = RequestKey::get(&url);
        assert_eq!(a.digest(), RequestKey::get(&url).digest());
        assert_eq!(a.digest().len(), 64);

        let post = RequestKey {
            method: "POST".to_string(),
            url: url.as_str().to_string(),
        };
        assert_ne!(a.digest(), post.digest());
        assert_eq!(a.to_string(), "GET https://app.example/a");
    }

    #[test]
    fn test_entry_round_trip_is_byte_identical() {
        let response = sample_response();
        let key = RequestKey::get(&Url::parse("https://app.example/index.html").unwrap());
        let restored = CacheEntry::capture(key, &response).to_response();

        assert_eq!(restored.status, response.status);
        assert_eq!(restored.status_text, response.status_text);
        assert_eq!(restored.headers, response.headers);
        assert_eq!(restored.body(), response.body());
        assert_eq!(restored.response_type, response.response_type);
        assert_eq!(restored.url, response.url);
    }

    #[test]
    fn test_entry_serializes_body_as_base64() {
        let key = RequestKey::get(&Url::parse("https://app.example/x").unwrap());
        let entry = CacheEntry::capture(key, &Response::new(200, vec![0u8, 159, 146, 150]));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"body\":\"AJ+Slg==\""));

        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[tokio::test]
    async fn test_put_then_match() {
        let caches = CacheStorage::in_memory();
        let cache = caches.open("v1").await.unwrap();
        let request = Request::parse_get("https://app.example/index.html").unwrap();

        cache.put(&request, &sample_response()).await.unwrap();

        let hit = cache.match_request(&request).await.unwrap().unwrap();
        assert_eq!(hit.text(), "<html>cached</html>");
        assert_eq!(hit.headers.get_all(SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn test_put_rejects_non_get() {
        let caches = CacheStorage::in_memory();
        let cache = caches.open("v1").await.unwrap();
        let request = Request::post(
            Url::parse("https://app.example/api").unwrap(),
            bytes_body(),
        );

        let result = cache.put(&request, &sample_response()).await;
        assert!(matches!(result, Err(SwError::Cache(_))));
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_match_respects_search_order() {
        let caches = CacheStorage::in_memory();
        let request = Request::parse_get("https://app.example/app.js").unwrap();

        caches
            .open("runtime")
            .await
            .unwrap()
            .put(&request, &Response::new(200, "from runtime"))
            .await
            .unwrap();
        caches
            .open("v2")
            .await
            .unwrap()
            .put(&request, &Response::new(200, "from precache"))
            .await
            .unwrap();

        let hit = caches
            .match_request(&request, &["v2", "runtime"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text(), "from precache");

        let miss = caches.match_request(&request, &["v1"]).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_detached_writes_outlive_their_caller() {
        let caches = CacheStorage::in_memory();
        let key = RequestKey::get(&Url::parse("https://esm.sh/preact").unwrap());

        {
            let clone = caches.clone();
            clone.put_detached("runtime", key.clone(), Response::new(200, "export {}"));
        }
        caches.settle().await;

        let hit = caches.match_key(&key, &["runtime"]).await.unwrap().unwrap();
        assert_eq!(hit.text(), "export {}");
    }

    #[tokio::test]
    async fn test_detached_write_failure_is_swallowed() {
        let caches = CacheStorage::in_memory();
        let post = RequestKey {
            method: "POST".to_string(),
            url: "https://app.example/api".to_string(),
        };

        caches.put_detached("runtime", post, Response::new(200, "{}"));
        caches.settle().await;

        assert!(caches.open("runtime").await.unwrap().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let caches = CacheStorage::in_memory();
        let request = Request::parse_get("https://app.example/app.js").unwrap();
        let stale = Request::parse_get("https://app.example/old.js").unwrap();

        let target = caches.open("v1").await.unwrap();
        target.put(&request, &Response::new(200, "old")).await.unwrap();
        target.put(&stale, &Response::new(200, "gone")).await.unwrap();
        caches
            .open("v1.staging")
            .await
            .unwrap()
            .put(&request, &Response::new(200, "new"))
            .await
            .unwrap();

        caches.rename("v1.staging", "v1").await.unwrap();

        assert_eq!(caches.keys().await.unwrap(), vec!["v1".to_string()]);
        let v1 = caches.open("v1").await.unwrap();
        assert_eq!(v1.match_request(&request).await.unwrap().unwrap().text(), "new");
        assert!(v1.match_request(&stale).await.unwrap().is_none());

        assert!(caches.rename("missing", "v1").await.is_err());
    }

    fn bytes_body() -> bytes::Bytes {
        bytes::Bytes::from_static(b"{}")
    }
}
