//! The worker instance and its cache read/write primitives.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::clients::ClientRegistry;
use crate::config::ServiceWorkerConfig;
use crate::diagnostic;
use crate::error::ConfigError;
use crate::identity::CacheIdentity;
use crate::matcher::current_location;
use crate::network::Network;
use crate::response::{Request, Response};
use crate::store::{CacheResult, CacheStorage, MatchOptions};

/// In-memory state living as long as one worker instance.
#[derive(Debug, Default)]
pub(crate) struct StickyFlags {
    /// A network error enabled cache-first for the force rule.
    pub(crate) force_try_cache_first: AtomicBool,
    /// The first-fetch precache check already ran.
    pub(crate) precache_checked: AtomicBool,
}

struct Inner {
    config: ServiceWorkerConfig,
    identity: CacheIdentity,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientRegistry>,
    flags: StickyFlags,
    log_enabled: bool,
}

/// A service worker instance applying the caching policy.
///
/// Cloning is cheap and every clone shares the sticky flags, so detached
/// background tasks observe the same instance state.
#[derive(Clone)]
pub struct CacheWorker {
    inner: Arc<Inner>,
}

impl CacheWorker {
    /// Create a worker. Fails if the configuration is invalid.
    pub fn new(
        config: ServiceWorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Arc<dyn ClientRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let identity = config.identity();
        let log_enabled = config
            .rules
            .log_enabled_location
            .includes(current_location(&config.location));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                identity,
                storage,
                network,
                clients,
                flags: StickyFlags::default(),
                log_enabled,
            }),
        })
    }

    pub fn config(&self) -> &ServiceWorkerConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> &CacheIdentity {
        &self.inner.identity
    }

    pub(crate) fn storage(&self) -> &dyn CacheStorage {
        self.inner.storage.as_ref()
    }

    pub(crate) fn network(&self) -> &dyn Network {
        self.inner.network.as_ref()
    }

    pub(crate) fn clients(&self) -> &dyn ClientRegistry {
        self.inner.clients.as_ref()
    }

    pub(crate) fn flags(&self) -> &StickyFlags {
        &self.inner.flags
    }

    /// Whether diagnostics are logged at full level for this location.
    pub fn log_enabled(&self) -> bool {
        self.inner.log_enabled
    }

    /// Whether a network error already switched matching URLs to cache-first.
    pub fn force_try_cache_first_enabled(&self) -> bool {
        self.inner.flags.force_try_cache_first.load(Ordering::Relaxed)
    }

    /// Whether the first-fetch precache check already ran on this instance.
    pub fn precache_check_performed(&self) -> bool {
        self.inner.flags.precache_checked.load(Ordering::Relaxed)
    }

    // ==================== Cache primitives ====================

    /// Look a request up in a cache without creating the cache.
    pub(crate) async fn try_read_from_cache(
        &self,
        cache_id: &str,
        request: &Request,
        options: MatchOptions,
    ) -> CacheResult<Option<Response>> {
        if !self.storage().has(cache_id).await? {
            return Ok(None);
        }
        let cache = self.storage().open(cache_id).await?;
        cache.match_request(request, options).await
    }

    /// Look a request up in a cache. Store failures are logged and count as a miss.
    pub(crate) async fn read_from_cache(
        &self,
        cache_id: &str,
        request: &Request,
        options: MatchOptions,
    ) -> Option<Response> {
        match self.try_read_from_cache(cache_id, request, options).await {
            Ok(response) => response,
            Err(err) => {
                diagnostic!(
                    self.log_enabled(),
                    error,
                    cache = cache_id,
                    url = %request.url,
                    error = %err,
                    "An error occurred while trying to get from the cache"
                );
                None
            }
        }
    }

    async fn try_put_in_cache(
        &self,
        cache_id: &str,
        request: &Request,
        response: Response,
    ) -> CacheResult<()> {
        let cache = self.storage().open(cache_id).await?;
        cache.put(request, response).await
    }

    /// Store a response. Returns whether the write succeeded.
    pub(crate) async fn put_in_cache(
        &self,
        cache_id: &str,
        request: &Request,
        response: Response,
    ) -> bool {
        match self.try_put_in_cache(cache_id, request, response).await {
            Ok(()) => {
                debug!(cache = cache_id, url = %request.url, "Stored response");
                true
            }
            Err(err) => {
                diagnostic!(
                    self.log_enabled(),
                    error,
                    cache = cache_id,
                    url = %request.url,
                    error = %err,
                    "An error occurred while trying to put the response in the cache"
                );
                false
            }
        }
    }

    /// Check if a URL is in the current cache.
    pub async fn has_in_cache(&self, url: &Url, options: MatchOptions) -> bool {
        let cache_id = self.identity().cache_id();
        self.read_from_cache(&cache_id, &Request::get(url.clone()), options)
            .await
            .is_some()
    }

    /// Check if every resource of the precache list is in the current cache.
    pub async fn has_in_cache_all_resources_to_precache(&self) -> bool {
        for resource in &self.config().resource_urls_to_precache {
            let url = match self.config().resolve_precache_url(resource) {
                Ok(url) => url,
                Err(_) => return false,
            };
            if !self.has_in_cache(&url, MatchOptions::default()).await {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWorker")
            .field("location", &self.inner.config.location.as_str())
            .field("identity", &self.inner.identity)
            .field("flags", &self.inner.flags)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::store::MemoryCacheStorage;

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ServiceWorkerConfig::new(location());
        config.service_worker_version = 0;
        let result = CacheWorker::new(
            config,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(EchoNetwork),
            Arc::new(crate::clients::Clients::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fresh_instance_flags_cleared() {
        let worker = worker_with(
            ServiceWorkerConfig::new(location()),
            Arc::new(MemoryCacheStorage::new()),
        );
        assert!(!worker.force_try_cache_first_enabled());
        assert!(!worker.precache_check_performed());
        assert!(!worker.log_enabled());
    }

    #[test]
    fn test_log_enabled_location() {
        let mut config = ServiceWorkerConfig::new(location());
        config.rules.log_enabled_location = crate::matcher::RuleSet::from_origin(&location());
        let worker = worker_with(config, Arc::new(MemoryCacheStorage::new()));
        assert!(worker.log_enabled());
    }

    #[tokio::test]
    async fn test_read_does_not_create_cache() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let worker = worker_with(ServiceWorkerConfig::new(location()), storage.clone());
        let request = Request::get(location().join("a.js").unwrap());
        assert!(worker
            .read_from_cache("app_cache_v1", &request, MatchOptions::default())
            .await
            .is_none());
        assert!(!storage.has("app_cache_v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_and_has_in_cache() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let mut config = ServiceWorkerConfig::new(location());
        config.resource_urls_to_precache = vec!["a.js".into(), "b.js".into()];
        let worker = worker_with(config, storage);

        let a = location().join("a.js").unwrap();
        assert!(
            worker
                .put_in_cache("app_cache_v1", &Request::get(a.clone()), Response::ok("a"))
                .await
        );
        assert!(worker.has_in_cache(&a, MatchOptions::default()).await);
        assert!(!worker.has_in_cache_all_resources_to_precache().await);

        let b = location().join("b.js").unwrap();
        worker
            .put_in_cache("app_cache_v1", &Request::get(b), Response::ok("b"))
            .await;
        assert!(worker.has_in_cache_all_resources_to_precache().await);
    }

    #[tokio::test]
    async fn test_put_head_fails_softly() {
        let worker = worker_with(
            ServiceWorkerConfig::new(location()),
            Arc::new(MemoryCacheStorage::new()),
        );
        let head = Request::head(location().join("a.js").unwrap());
        assert!(!worker.put_in_cache("app_cache_v1", &head, Response::ok("")).await);
    }
}
