//! Install and activate.
//!
//! Install fills the temp generations; activate merges them into the current
//! ones and removes every obsolete generation of the app.

use tracing::{debug, error, info, warn};

use crate::diagnostic;
use crate::error::{Result, ServiceWorkerError};
use crate::identity::GenerationKind;
use crate::matcher::current_location;
use crate::precache::{PrecacheOptions, PrecacheReport};
use crate::response::Request;
use crate::store::{Cache, CacheResult, MatchOptions};
use crate::worker::CacheWorker;

impl CacheWorker {
    /// Handle the install event.
    pub async fn install(&self) -> Result<PrecacheReport> {
        let location = current_location(&self.config().location);
        if self
            .config()
            .rules
            .reject_service_worker_location
            .includes(location)
        {
            return Err(ServiceWorkerError::InstallRejected(location.to_string()));
        }

        let report = self.precache(PrecacheOptions::install()).await?;

        if self.config().flags.immediately_activate_new_service_worker {
            if let Err(err) = self.clients().skip_waiting().await {
                warn!(error = %err, "Skip waiting failed");
            }
        }

        info!(
            version = self.config().service_worker_version,
            cache = %self.identity().cache_id(),
            "Service worker installed"
        );
        Ok(report)
    }

    /// Handle the activate event.
    ///
    /// Failures are swallowed unless activation failures reject the worker, in
    /// which case the worker unregisters itself, reloads its pages and returns
    /// [`ServiceWorkerError::ActivationAborted`].
    pub async fn activate(&self) -> Result<()> {
        match self.try_activate().await {
            Ok(()) => {
                info!(cache = %self.identity().cache_id(), "Service worker activated");
                Ok(())
            }
            Err(err) if self.rejects_on_activation_failure() => {
                self.abort_activation().await;
                error!(error = %err, "An error occurred while activating the service worker");
                Err(ServiceWorkerError::ActivationAborted(err.to_string()))
            }
            Err(err) => {
                diagnostic!(
                    self.log_enabled(),
                    warn,
                    error = %err,
                    "Activation step failed, activating anyway"
                );
                Ok(())
            }
        }
    }

    fn rejects_on_activation_failure(&self) -> bool {
        self.config().flags.reject_service_worker_on_activation_fail
    }

    async fn try_activate(&self) -> Result<()> {
        let identity = self.identity();

        let merged = self
            .merge_generation(&identity.temp_cache_id(), &identity.cache_id())
            .await;
        self.tolerate(merged)?;
        self.delete_obsolete(GenerationKind::TempCache).await;

        let merged = self
            .merge_generation(
                &identity.temp_refetch_checklist_id(),
                &identity.refetch_checklist_id(),
            )
            .await;
        self.tolerate(merged)?;
        self.delete_obsolete(GenerationKind::TempRefetchChecklist).await;

        self.delete_obsolete(GenerationKind::Cache).await;
        self.delete_obsolete(GenerationKind::RefetchChecklist).await;

        let flags = self.config().flags;
        if flags.reload_all_pages_on_service_worker_activation {
            self.reload_clients().await?;
        }

        if flags.immediately_take_control_of_all_pages {
            self.clients().claim().await?;
            if flags.reload_all_pages_after_immediately_taking_control_of_them {
                self.reload_clients().await?;
            }
        }

        Ok(())
    }

    /// Swallow a failed step unless activation failures are fatal.
    fn tolerate(&self, result: Result<usize>) -> Result<()> {
        match result {
            Ok(_) => Ok(()),
            Err(err) if self.rejects_on_activation_failure() => Err(err),
            Err(err) => {
                diagnostic!(self.log_enabled(), warn, error = %err, "Activation step failed");
                Ok(())
            }
        }
    }

    /// Copy every entry of `from_id` into `to_id`. Returns the number copied.
    async fn merge_generation(&self, from_id: &str, to_id: &str) -> Result<usize> {
        if !self.storage().has(from_id).await? {
            return Ok(0);
        }
        let from = self.storage().open(from_id).await?;
        let to = self.storage().open(to_id).await?;

        let mut copied = 0;
        for key in from.keys().await? {
            match copy_entry(from.as_ref(), to.as_ref(), &key).await {
                Ok(true) => copied += 1,
                Ok(false) => {}
                Err(err) if self.rejects_on_activation_failure() => return Err(err.into()),
                Err(err) => {
                    diagnostic!(
                        self.log_enabled(),
                        warn,
                        from = from_id,
                        to = to_id,
                        url = %key.url,
                        error = %err,
                        "Failed to copy entry"
                    );
                }
            }
        }

        debug!(from = from_id, to = to_id, copied, "Merged generation");
        Ok(copied)
    }

    /// Delete every obsolete generation of a kind. Failures are ignored.
    async fn delete_obsolete(&self, kind: GenerationKind) -> usize {
        let ids = match self.storage().keys().await {
            Ok(ids) => ids,
            Err(err) => {
                debug!(?kind, error = %err, "Failed to list caches");
                return 0;
            }
        };

        let mut deleted = 0;
        for id in ids {
            if !self.identity().should_delete(&id, kind) {
                continue;
            }
            match self.storage().delete(&id).await {
                Ok(true) => {
                    debug!(cache = %id, ?kind, "Deleted obsolete generation");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(err) => debug!(cache = %id, error = %err, "Failed to delete generation"),
            }
        }
        deleted
    }

    /// Navigate every controlled page to its own URL.
    async fn reload_clients(&self) -> Result<()> {
        for client in self.clients().match_all().await? {
            if let Err(err) = self.clients().navigate(&client.id, &client.url).await {
                warn!(client = %client.id, error = %err, "Failed to reload client");
            }
        }
        Ok(())
    }

    async fn abort_activation(&self) {
        let clients = match self.clients().match_all().await {
            Ok(clients) => clients,
            Err(err) => {
                warn!(error = %err, "Failed to list clients");
                Vec::new()
            }
        };

        match self.clients().unregister().await {
            Ok(removed) => info!(removed, "Service worker unregistered"),
            Err(err) => warn!(error = %err, "Failed to unregister service worker"),
        }

        for client in clients {
            if let Err(err) = self.clients().navigate(&client.id, &client.url).await {
                warn!(client = %client.id, error = %err, "Failed to reload client");
            }
        }
    }
}

async fn copy_entry(from: &dyn Cache, to: &dyn Cache, key: &Request) -> CacheResult<bool> {
    match from.match_request(key, MatchOptions::default()).await? {
        Some(response) => {
            to.put(key, response).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
