//! Precache orchestration.
//!
//! Every resource of the precache list is checked and fetched concurrently.
//! Resources are independent: one failing never cancels the others, and all of
//! them finish before the outcome is reported.

use futures::future::join_all;
use tracing::{debug, info};

use crate::diagnostic;
use crate::error::{Result, ServiceWorkerError};
use crate::response::Request;
use crate::store::MatchOptions;
use crate::worker::CacheWorker;

/// How a precache run behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecacheOptions {
    /// Fail the run when a resource matching the reject rule fails.
    pub allow_reject_on_failure: bool,
    /// Write into the temp generations of an ongoing install.
    pub use_temps: bool,
    /// Running as part of the install event.
    pub install_phase: bool,
}

impl PrecacheOptions {
    /// Options used by the install event.
    pub fn install() -> Self {
        Self {
            allow_reject_on_failure: true,
            use_temps: true,
            install_phase: true,
        }
    }

    /// Options used outside of install, writing straight into the current cache.
    pub fn background() -> Self {
        Self {
            allow_reject_on_failure: false,
            use_temps: false,
            install_phase: false,
        }
    }
}

/// Outcome for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecacheOutcome {
    /// Found in the current or temp cache, nothing fetched.
    AlreadyCached,
    /// Fetched and stored.
    Fetched,
    /// Could not be fetched or stored.
    Failed,
}

/// Per-resource outcomes of a precache run, in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    pub resources: Vec<(String, PrecacheOutcome)>,
}

impl PrecacheReport {
    fn count(&self, outcome: PrecacheOutcome) -> usize {
        self.resources.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn fetched(&self) -> usize {
        self.count(PrecacheOutcome::Fetched)
    }

    pub fn already_cached(&self) -> usize {
        self.count(PrecacheOutcome::AlreadyCached)
    }

    pub fn failed(&self) -> usize {
        self.count(PrecacheOutcome::Failed)
    }

    /// Outcome for a resource URL.
    pub fn outcome(&self, url: &str) -> Option<PrecacheOutcome> {
        self.resources
            .iter()
            .find(|(resource, _)| resource == url)
            .map(|(_, outcome)| *outcome)
    }
}

struct ResourceResult {
    url: String,
    outcome: PrecacheOutcome,
    reject: bool,
}

impl CacheWorker {
    /// Precache the configured resources.
    ///
    /// Returns [`ServiceWorkerError::PrecacheFailed`] for the first resource,
    /// in list order, whose failure rejects the run.
    pub async fn precache(&self, options: PrecacheOptions) -> Result<PrecacheReport> {
        let resources = &self.config().resource_urls_to_precache;
        if resources.is_empty() {
            return Ok(PrecacheReport::default());
        }

        if options.use_temps
            && options.install_phase
            && !self.config().flags.recover_installation_from_last_attempt
        {
            self.delete_temp_data().await?;
        }

        let results = join_all(
            resources
                .iter()
                .map(|resource| self.precache_resource(resource, options)),
        )
        .await;

        let rejected = results.iter().find(|result| result.reject).map(|r| r.url.clone());
        let report = PrecacheReport {
            resources: results
                .into_iter()
                .map(|result| (result.url, result.outcome))
                .collect(),
        };
        info!(
            fetched = report.fetched(),
            already_cached = report.already_cached(),
            failed = report.failed(),
            install = options.install_phase,
            "Precache finished"
        );

        match rejected {
            Some(url) => Err(ServiceWorkerError::PrecacheFailed(url)),
            None => Ok(report),
        }
    }

    /// Delete the temp cache and temp checklist left by a previous attempt.
    async fn delete_temp_data(&self) -> Result<()> {
        for id in [
            self.identity().temp_cache_id(),
            self.identity().temp_refetch_checklist_id(),
        ] {
            let existed = self.storage().has(&id).await?;
            let deleted = self.storage().delete(&id).await?;
            if existed && !deleted {
                return Err(ServiceWorkerError::internal(format!(
                    "An error occurred while trying to delete the temporary data during the installation phase: {id}"
                )));
            }
            debug!(cache = %id, existed, "Deleted temporary install data");
        }
        Ok(())
    }

    async fn precache_resource(&self, resource: &str, options: PrecacheOptions) -> ResourceResult {
        let url = match self.config().resolve_precache_url(resource) {
            Ok(url) => url,
            Err(err) => {
                diagnostic!(
                    self.log_enabled(),
                    error,
                    resource,
                    error = %err,
                    "Failed to resolve resource to precache"
                );
                return self.resource_failed(resource.to_string(), options);
            }
        };

        let refetch = self.should_refetch(&url, options.use_temps).await;
        let request = Request::get(url);
        let needed = refetch || !self.is_precached(&request, options.use_temps).await;
        if !needed {
            return ResourceResult {
                url: request.url.to_string(),
                outcome: PrecacheOutcome::AlreadyCached,
                reject: false,
            };
        }

        let network_allowed_override = options.install_phase.then_some(true);
        let (_, cached) = self
            .fetch_from_network_and_put_in_cache(
                &request,
                refetch,
                options.use_temps,
                network_allowed_override,
            )
            .await;

        if cached {
            ResourceResult {
                url: request.url.to_string(),
                outcome: PrecacheOutcome::Fetched,
                reject: false,
            }
        } else {
            diagnostic!(
                self.log_enabled(),
                error,
                url = %request.url,
                "Failed to fetch resource to precache"
            );
            self.resource_failed(request.url.to_string(), options)
        }
    }

    async fn is_precached(&self, request: &Request, use_temps: bool) -> bool {
        let identity = self.identity();
        if self
            .read_from_cache(&identity.cache_id(), request, MatchOptions::default())
            .await
            .is_some()
        {
            return true;
        }
        use_temps
            && self
                .read_from_cache(&identity.temp_cache_id(), request, MatchOptions::default())
                .await
                .is_some()
    }

    fn resource_failed(&self, url: String, options: PrecacheOptions) -> ResourceResult {
        let reject = options.allow_reject_on_failure
            && self
                .config()
                .rules
                .reject_service_worker_on_precache_fail
                .includes(&url);
        ResourceResult {
            url,
            outcome: PrecacheOutcome::Failed,
            reject,
        }
    }
}
