//! Refetch checklist.
//!
//! Resources matching the `refetch_from_network` rule are fetched from the
//! network once per refetch version. Each successful refetch leaves an empty
//! marker keyed by URL in the checklist generation; a marker means the resource
//! was already refetched.

use tracing::debug;
use url::Url;

use crate::diagnostic;
use crate::response::{Request, Response};
use crate::store::{CacheResult, MatchOptions};
use crate::worker::CacheWorker;

impl CacheWorker {
    /// Whether the resource must bypass the cache and be refetched.
    ///
    /// With `check_temp` the temp checklist of an ongoing install is also
    /// consulted. Store errors count as "do not refetch".
    pub async fn should_refetch(&self, url: &Url, check_temp: bool) -> bool {
        if !self.config().rules.refetch_from_network.includes(url.as_str()) {
            return false;
        }

        match self.refetch_pending(url, check_temp).await {
            Ok(pending) => pending,
            Err(err) => {
                diagnostic!(
                    self.log_enabled(),
                    error,
                    url = %url,
                    error = %err,
                    "An error occurred while trying to check if the resource should be refetched"
                );
                false
            }
        }
    }

    async fn refetch_pending(&self, url: &Url, check_temp: bool) -> CacheResult<bool> {
        let key = Request::get(url.clone());
        let identity = self.identity();

        if self
            .try_read_from_cache(&identity.refetch_checklist_id(), &key, MatchOptions::default())
            .await?
            .is_some()
        {
            return Ok(false);
        }

        if check_temp
            && self
                .try_read_from_cache(
                    &identity.temp_refetch_checklist_id(),
                    &key,
                    MatchOptions::default(),
                )
                .await?
                .is_some()
        {
            return Ok(false);
        }

        Ok(true)
    }

    /// Mark a resource as refetched in the current or temp checklist.
    pub async fn tick_refetch_checklist(&self, url: &Url, use_temp: bool) -> bool {
        let checklist_id = if use_temp {
            self.identity().temp_refetch_checklist_id()
        } else {
            self.identity().refetch_checklist_id()
        };
        let ticked = self
            .put_in_cache(&checklist_id, &Request::get(url.clone()), Response::ok(""))
            .await;
        if ticked {
            debug!(checklist = %checklist_id, url = %url, "Ticked off refetch checklist");
        }
        ticked
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::ServiceWorkerConfig;
    use crate::matcher::RuleSet;
    use crate::store::{CacheStorage, MemoryCacheStorage};
    use crate::worker::test_support::*;

    fn config() -> ServiceWorkerConfig {
        let mut config = ServiceWorkerConfig::new(location());
        config.rules.refetch_from_network = RuleSet::new([r"\.js$"], Vec::<String>::new()).unwrap();
        config.refetch_from_network_version = 2;
        config
    }

    #[tokio::test]
    async fn test_rule_gates_refetch() {
        let worker = worker_with(config(), Arc::new(MemoryCacheStorage::new()));
        assert!(worker.should_refetch(&location().join("a.js").unwrap(), false).await);
        assert!(!worker.should_refetch(&location().join("a.png").unwrap(), false).await);
    }

    #[tokio::test]
    async fn test_tick_stops_refetch() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let worker = worker_with(config(), storage.clone());
        let url = location().join("a.js").unwrap();

        assert!(worker.tick_refetch_checklist(&url, false).await);
        assert!(storage.has("app_cache_v1_refetch_checklist_v2").await.unwrap());
        assert!(!worker.should_refetch(&url, false).await);
    }

    #[tokio::test]
    async fn test_temp_checklist_only_when_asked() {
        let worker = worker_with(config(), Arc::new(MemoryCacheStorage::new()));
        let url = location().join("a.js").unwrap();

        assert!(worker.tick_refetch_checklist(&url, true).await);
        assert!(worker.should_refetch(&url, false).await);
        assert!(!worker.should_refetch(&url, true).await);
    }

    #[tokio::test]
    async fn test_new_refetch_version_refetches_again() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let url = location().join("a.js").unwrap();

        let worker = worker_with(config(), storage.clone());
        worker.tick_refetch_checklist(&url, false).await;

        let mut next = config();
        next.refetch_from_network_version = 3;
        let worker = worker_with(next, storage);
        assert!(worker.should_refetch(&url, false).await);
    }
}
