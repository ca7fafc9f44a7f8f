//! Named cache store.
//!
//! The engine talks to the persistent store only through [`CacheStorage`] and
//! [`Cache`]. [`MemoryCacheStorage`] is the in-process implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::header::VARY;
use http::{HeaderMap, Method};
use tokio::sync::RwLock;
use url::Url;

use crate::error::CacheError;
use crate::response::{Request, Response, ResponseType};

/// Result type for store operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Options for matching a request against cached entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Ignore the query string of both URLs.
    pub ignore_search: bool,
    /// Ignore the `Vary` header of cached responses.
    pub ignore_vary: bool,
}

impl MatchOptions {
    pub fn new(ignore_search: bool, ignore_vary: bool) -> Self {
        Self {
            ignore_search,
            ignore_vary,
        }
    }
}

/// Collection of named caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it does not exist.
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> CacheResult<bool>;

    /// Names of all caches.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> CacheResult<bool>;
}

/// A single named cache of request/response pairs.
#[async_trait]
pub trait Cache: Send + Sync {
    /// First response matching the request.
    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> CacheResult<Option<Response>>;

    /// Store a response for a GET request, replacing any matching entry.
    async fn put(&self, request: &Request, response: Response) -> CacheResult<()>;

    /// Requests of all entries.
    async fn keys(&self) -> CacheResult<Vec<Request>>;

    /// Delete the entries matching a request. Returns whether any existed.
    async fn delete(&self, request: &Request) -> CacheResult<bool>;
}

// ==================== Memory store ====================

/// In-memory [`CacheStorage`].
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoryCacheStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Ok(cache.clone() as Arc<dyn Cache>);
        }
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::default()))
            .clone();
        Ok(cache as Arc<dyn Cache>)
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}

/// Snapshot of a stored response.
#[derive(Debug, Clone)]
struct StoredResponse {
    status: u16,
    response_type: ResponseType,
    headers: HeaderMap,
    url: Option<Url>,
    body: Bytes,
}

impl StoredResponse {
    fn from_response(response: Response) -> Self {
        let status = response.status;
        let response_type = response.response_type;
        let headers = response.headers.clone();
        let url = response.url.clone();
        Self {
            status,
            response_type,
            headers,
            url,
            body: response.bytes(),
        }
    }

    fn to_response(&self) -> Response {
        let mut response =
            Response::new(self.status, self.body.clone()).with_type(self.response_type);
        response.headers = self.headers.clone();
        response.url = self.url.clone();
        response
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    request: Request,
    response: StoredResponse,
}

/// In-memory [`Cache`]. Entries keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<Vec<CacheEntry>>,
}

impl MemoryCache {
    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> CacheResult<Option<Response>> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|entry| entry_matches(entry, request, options))
            .map(|entry| entry.response.to_response()))
    }

    async fn put(&self, request: &Request, response: Response) -> CacheResult<()> {
        if request.method != Method::GET {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }
        if vary_fields(&response.headers).any(|field| field == "*") {
            return Err(CacheError::storage("responses with Vary: * cannot be cached"));
        }

        let entry = CacheEntry {
            request: request.clone(),
            response: StoredResponse::from_response(response),
        };
        let mut entries = self.entries.write().await;
        entries.retain(|existing| !entry_matches(existing, request, MatchOptions::default()));
        entries.push(entry);
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<Request>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|entry| entry.request.clone())
            .collect())
    }

    async fn delete(&self, request: &Request) -> CacheResult<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|existing| !entry_matches(existing, request, MatchOptions::default()));
        Ok(entries.len() != before)
    }
}

fn entry_matches(entry: &CacheEntry, request: &Request, options: MatchOptions) -> bool {
    if !urls_match(&entry.request.url, &request.url, options.ignore_search) {
        return false;
    }
    if options.ignore_vary {
        return true;
    }
    vary_fields(&entry.response.headers).all(|field| {
        field != "*"
            && entry.request.headers.get(field.as_str()) == request.headers.get(field.as_str())
    })
}

fn urls_match(stored: &Url, query: &Url, ignore_search: bool) -> bool {
    let strip = |url: &Url| {
        let mut url = url.clone();
        url.set_fragment(None);
        if ignore_search {
            url.set_query(None);
        }
        url
    };
    strip(stored) == strip(query)
}

fn vary_fields(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all(VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|field| field.trim().to_ascii_lowercase())
        .filter(|field| !field.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::ACCEPT_LANGUAGE;
    use http::HeaderValue;

    fn request(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_open_has_delete() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("a").await.unwrap());
        storage.open("a").await.unwrap();
        assert!(storage.has("a").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["a".to_string()]);
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_returns_same_cache() {
        let storage = MemoryCacheStorage::new();
        let first = storage.open("a").await.unwrap();
        first
            .put(&request("https://x.test/a.js"), Response::ok("a"))
            .await
            .unwrap();
        let second = storage.open("a").await.unwrap();
        assert_eq!(second.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let cache = MemoryCache::default();
        cache
            .put(&request("https://x.test/a.js"), Response::ok("body"))
            .await
            .unwrap();

        let hit = cache
            .match_request(&request("https://x.test/a.js#frag"), MatchOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text_body(), "body");

        let miss = cache
            .match_request(&request("https://x.test/b.js"), MatchOptions::default())
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_match_returns_fresh_copies() {
        let cache = MemoryCache::default();
        let key = request("https://x.test/a.js");
        cache.put(&key, Response::ok("body")).await.unwrap();
        for _ in 0..2 {
            let hit = cache.match_request(&key, MatchOptions::default()).await.unwrap();
            assert_eq!(hit.unwrap().text_body(), "body");
        }
    }

    #[tokio::test]
    async fn test_ignore_search() {
        let cache = MemoryCache::default();
        cache
            .put(&request("https://x.test/a.js?v=1"), Response::ok("v1"))
            .await
            .unwrap();
        let query = request("https://x.test/a.js?v=2");
        assert!(cache
            .match_request(&query, MatchOptions::default())
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .match_request(&query, MatchOptions::new(true, false))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_vary_matching() {
        let cache = MemoryCache::default();
        let stored = request("https://x.test/page")
            .header(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        let response = Response::ok("en").header(VARY, HeaderValue::from_static("Accept-Language"));
        cache.put(&stored, response).await.unwrap();

        let other = request("https://x.test/page")
            .header(ACCEPT_LANGUAGE, HeaderValue::from_static("fr"));
        assert!(cache
            .match_request(&other, MatchOptions::default())
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .match_request(&other, MatchOptions::new(false, true))
            .await
            .unwrap()
            .is_some());
        assert!(cache
            .match_request(&stored, MatchOptions::default())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_put_rejects_non_get() {
        let cache = MemoryCache::default();
        let head = request("https://x.test/a.js").with_method(Method::HEAD);
        let err = cache.put(&head, Response::ok("")).await.unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedMethod(_)));
    }

    #[tokio::test]
    async fn test_put_rejects_vary_star() {
        let cache = MemoryCache::default();
        let response = Response::ok("").header(VARY, HeaderValue::from_static("*"));
        assert!(cache.put(&request("https://x.test/a"), response).await.is_err());
    }

    #[tokio::test]
    async fn test_head_lookup_misses_get_entry() {
        let cache = MemoryCache::default();
        cache
            .put(&request("https://x.test/a.js"), Response::ok("a"))
            .await
            .unwrap();
        let head = request("https://x.test/a.js").with_method(Method::HEAD);
        assert!(cache
            .match_request(&head, MatchOptions::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_and_delete() {
        let cache = MemoryCache::default();
        let key = request("https://x.test/a.js");
        cache.put(&key, Response::ok("old")).await.unwrap();
        cache.put(&key, Response::ok("new")).await.unwrap();
        assert_eq!(cache.len().await, 1);
        let hit = cache.match_request(&key, MatchOptions::default()).await.unwrap();
        assert_eq!(hit.unwrap().text_body(), "new");

        assert!(cache.delete(&key).await.unwrap());
        assert!(cache.is_empty().await);
    }
}
