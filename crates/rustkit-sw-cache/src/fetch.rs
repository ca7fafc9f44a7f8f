//! Fetch-and-cache orchestration for intercepted requests.
//!
//! ```text
//! request ─► handled? ──no──► network (pass-through)
//!              │yes
//!              ▼
//!        cache first? ──hit──► cached response (+ background refresh)
//!              │miss / no
//!              ▼
//!         network ──ok/opaque──► store copy ─► network response
//!              │failure
//!              ▼
//!   sticky flag, cache, relaxed cache ──► cached response or network failure
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use http::Method;
use tracing::{debug, warn};
use url::Url;

use crate::diagnostic;
use crate::error::{NetworkError, Result};
use crate::precache::PrecacheOptions;
use crate::response::{Request, Response};
use crate::store::MatchOptions;
use crate::worker::CacheWorker;

impl CacheWorker {
    /// Produce a response for an intercepted request.
    ///
    /// Never fails: errors and panics while handling the request become a
    /// `500` text response naming the URL.
    pub async fn handle_fetch(&self, request: Request) -> Response {
        let url = request.url.clone();
        match AssertUnwindSafe(self.fetch_from_service_worker(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => self.service_worker_failure(&url, &err.to_string()),
            Err(panic) => self.service_worker_failure(&url, &panic_message(panic.as_ref())),
        }
    }

    /// Whether the engine handles this request or lets it through.
    pub fn should_handle_request(&self, request: &Request) -> bool {
        request.method == Method::GET
            || (request.method == Method::HEAD
                && self
                    .config()
                    .rules
                    .handle_head_requests
                    .includes(request.url_str()))
    }

    async fn fetch_from_service_worker(&self, request: Request) -> Result<Response> {
        self.check_resources_precached_on_first_fetch();

        if !self.should_handle_request(&request) {
            debug!(method = %request.method, url = %request.url, "Passing request through");
            return Ok(self.network().fetch(&request).await?);
        }

        let rules = &self.config().rules;
        let url = request.url_str();
        let refetch = self.should_refetch(&request.url, false).await;
        let fetch_from_cache_allowed = rules.fetch_from_cache_allowed.includes(url);
        let mut cache_already_tried = false;

        if !refetch && fetch_from_cache_allowed {
            let try_cache_first = rules.try_cache_first.includes(url);
            let forced = self.force_try_cache_first_enabled()
                && rules.force_try_cache_first_on_network_error.includes(url);

            if try_cache_first || forced {
                cache_already_tried = true;
                if let Some(cached) = self.fetch_from_cache(&request, self.match_options(url)).await
                {
                    debug!(url = %request.url, forced, "Served from cache first");
                    self.update_cache_in_background(&request);
                    return Ok(cached);
                }
            }
        }

        let (network_response, _) = self
            .fetch_from_network_and_put_in_cache(&request, refetch, false, None)
            .await;
        if network_response.is_ok() || network_response.is_opaque() {
            return Ok(network_response);
        }

        self.enable_force_try_cache_first(url);

        if fetch_from_cache_allowed {
            if !cache_already_tried {
                if let Some(cached) = self.fetch_from_cache(&request, self.match_options(url)).await
                {
                    debug!(url = %request.url, "Served from cache after network failure");
                    return Ok(cached);
                }
            }

            let fallback = MatchOptions::new(
                rules.try_cache_ignoring_url_params_as_fallback.includes(url),
                rules.try_cache_ignoring_vary_header_as_fallback.includes(url),
            );
            if fallback.ignore_search || fallback.ignore_vary {
                if let Some(cached) = self.fetch_from_cache(&request, fallback).await {
                    diagnostic!(
                        self.log_enabled(),
                        warn,
                        url = %request.url,
                        ignore_search = fallback.ignore_search,
                        ignore_vary = fallback.ignore_vary,
                        "Get from cache using a fallback"
                    );
                    return Ok(cached);
                }
            }
        }

        Ok(network_response)
    }

    /// Fetch from the network and store a copy when the policy allows it.
    ///
    /// Returns the response and whether it was stored. With `refetch` a
    /// successful store also ticks the refetch checklist.
    pub(crate) async fn fetch_from_network_and_put_in_cache(
        &self,
        request: &Request,
        refetch: bool,
        use_temps: bool,
        network_allowed_override: Option<bool>,
    ) -> (Response, bool) {
        let response = self
            .fetch_from_network(request, network_allowed_override)
            .await;
        if !self.should_cache(request, &response) {
            return (response, false);
        }

        let (response, copy) = response.tee();
        let cache_id = if use_temps {
            self.identity().temp_cache_id()
        } else {
            self.identity().cache_id()
        };
        let cached = self.put_in_cache(&cache_id, request, copy).await;
        if cached && refetch {
            self.tick_refetch_checklist(&request.url, use_temps).await;
        }
        (response, cached)
    }

    /// Fetch from the network. Rejected or disallowed fetches become a `500`.
    pub(crate) async fn fetch_from_network(
        &self,
        request: &Request,
        network_allowed_override: Option<bool>,
    ) -> Response {
        let allowed = network_allowed_override.unwrap_or_else(|| {
            self.config()
                .rules
                .fetch_from_network_allowed
                .includes(request.url_str())
        });

        let result = if allowed {
            self.network().fetch(request).await
        } else {
            Err(NetworkError::NotAllowed(request.url.to_string()))
        };

        match result {
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Fetched from network");
                response
            }
            Err(err) => {
                let message = format!(
                    "An error occurred while trying to fetch from the network: {}\n\n{}",
                    request.url, err
                );
                diagnostic!(self.log_enabled(), error, "{}", message);
                Response::text(500, message)
            }
        }
    }

    /// Whether a network response for this request should be stored.
    pub fn should_cache(&self, request: &Request, response: &Response) -> bool {
        let rules = &self.config().rules;
        let url = request.url_str();
        request.method == Method::GET
            && rules.put_in_cache.includes(url)
            && response.is_cacheable(rules.put_in_cache_allowed_for_opaque_responses.includes(url))
    }

    /// Look the request up in the current cache. Entries are stored under GET,
    /// so a handled HEAD request is looked up as GET.
    async fn fetch_from_cache(&self, request: &Request, options: MatchOptions) -> Option<Response> {
        let cache_id = self.identity().cache_id();
        if request.method == Method::GET {
            return self.read_from_cache(&cache_id, request, options).await;
        }
        let key = request.clone().with_method(Method::GET);
        self.read_from_cache(&cache_id, &key, options).await
    }

    fn match_options(&self, url: &str) -> MatchOptions {
        let rules = &self.config().rules;
        MatchOptions::new(
            rules.try_cache_ignoring_url_params.includes(url),
            rules.try_cache_ignoring_vary_header.includes(url),
        )
    }

    /// Refresh a cache-first hit from the network in a detached task.
    fn update_cache_in_background(&self, request: &Request) {
        let rules = &self.config().rules;
        let url = request.url_str();
        if !rules.update_cache_in_background.includes(url) {
            return;
        }

        let refresh = if request.method == Method::GET {
            request.clone()
        } else if request.method == Method::HEAD
            && rules
                .update_cache_in_background_allowed_for_head_requests
                .includes(url)
        {
            request.clone().with_method(Method::GET)
        } else {
            return;
        };

        let worker = self.clone();
        tokio::spawn(async move {
            let (response, cached) = worker
                .fetch_from_network_and_put_in_cache(&refresh, false, false, None)
                .await;
            debug!(
                url = %refresh.url,
                status = response.status,
                cached,
                "Background cache update finished"
            );
        });
    }

    fn enable_force_try_cache_first(&self, url: &str) {
        if self.force_try_cache_first_enabled()
            || !self
                .config()
                .rules
                .enable_force_try_cache_first_on_network_error
                .includes(url)
        {
            return;
        }
        if !self
            .flags()
            .force_try_cache_first
            .swap(true, Ordering::Relaxed)
        {
            diagnostic!(self.log_enabled(), warn, "Force try cache on network error enabled");
        }
    }

    fn check_resources_precached_on_first_fetch(&self) {
        if !self
            .config()
            .flags
            .check_resources_have_been_precached_on_first_fetch
            || self.flags().precache_checked.swap(true, Ordering::Relaxed)
        {
            return;
        }

        let worker = self.clone();
        tokio::spawn(async move {
            if let Err(err) = worker.precache(PrecacheOptions::background()).await {
                warn!(error = %err, "Precache check on first fetch failed");
            }
        });
    }

    fn service_worker_failure(&self, url: &Url, error: &str) -> Response {
        let message = format!(
            "An error occurred while trying to fetch from the service worker: {}\n\n{}",
            url, error
        );
        diagnostic!(self.log_enabled(), error, "{}", message);
        Response::text(500, message)
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic while handling the request".to_string()
    }
}
