//! Service worker configuration

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::identity::{ActiveVersions, CacheIdentity};
use crate::matcher::RuleSet;

/// Service worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceWorkerConfig {
    /// Prefix of every cache name. Changing it orphans the caches of
    /// previous workers.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Incremented on every worker release
    #[serde(default = "default_version")]
    pub service_worker_version: u32,

    /// Incremented when previously cached resources are no longer valid
    #[serde(default = "default_version")]
    pub cache_version: u32,

    /// Incremented to refetch the `refetch_from_network` resources once
    #[serde(default = "default_version")]
    pub refetch_from_network_version: u32,

    /// URL of the worker script
    pub location: Url,

    /// Resources fetched on install, relative to the worker location
    #[serde(default)]
    pub resource_urls_to_precache: Vec<String>,

    /// Per-URL policies
    #[serde(default)]
    pub rules: PolicyRules,

    /// Lifecycle switches
    #[serde(default)]
    pub flags: PolicyFlags,
}

/// One rule set per policy axis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyRules {
    /// Which responses can be stored. Only GET requests are ever stored.
    pub put_in_cache: RuleSet,
    /// Serve from the cache before trying the network.
    pub try_cache_first: RuleSet,
    /// After a cache-first hit, refresh the entry from the network.
    pub update_cache_in_background: RuleSet,
    /// Worker locations on which install is refused.
    pub reject_service_worker_location: RuleSet,
    /// Worker locations on which diagnostics are logged at full level.
    pub log_enabled_location: RuleSet,
    pub fetch_from_network_allowed: RuleSet,
    pub fetch_from_cache_allowed: RuleSet,
    /// A network failure on these URLs makes every later request try the cache first.
    pub enable_force_try_cache_first_on_network_error: RuleSet,
    /// URLs that honor the sticky cache-first flag.
    pub force_try_cache_first_on_network_error: RuleSet,
    pub try_cache_ignoring_url_params: RuleSet,
    pub try_cache_ignoring_vary_header: RuleSet,
    pub try_cache_ignoring_url_params_as_fallback: RuleSet,
    pub try_cache_ignoring_vary_header_as_fallback: RuleSet,
    pub put_in_cache_allowed_for_opaque_responses: RuleSet,
    pub handle_head_requests: RuleSet,
    pub update_cache_in_background_allowed_for_head_requests: RuleSet,
    /// Resources fetched once from the network per refetch version.
    pub refetch_from_network: RuleSet,
    /// Precache failures on these URLs fail the install.
    pub reject_service_worker_on_precache_fail: RuleSet,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            put_in_cache: RuleSet::every(),
            try_cache_first: RuleSet::none(),
            update_cache_in_background: RuleSet::none(),
            reject_service_worker_location: RuleSet::none(),
            log_enabled_location: RuleSet::none(),
            fetch_from_network_allowed: RuleSet::every(),
            fetch_from_cache_allowed: RuleSet::every(),
            enable_force_try_cache_first_on_network_error: RuleSet::none(),
            force_try_cache_first_on_network_error: RuleSet::none(),
            try_cache_ignoring_url_params: RuleSet::none(),
            try_cache_ignoring_vary_header: RuleSet::none(),
            try_cache_ignoring_url_params_as_fallback: RuleSet::none(),
            try_cache_ignoring_vary_header_as_fallback: RuleSet::none(),
            put_in_cache_allowed_for_opaque_responses: RuleSet::none(),
            handle_head_requests: RuleSet::none(),
            update_cache_in_background_allowed_for_head_requests: RuleSet::none(),
            refetch_from_network: RuleSet::none(),
            reject_service_worker_on_precache_fail: RuleSet::none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyFlags {
    /// Unregister the worker and reload its pages if activation fails
    pub reject_service_worker_on_activation_fail: bool,

    /// Precache missing resources on the first fetch of each worker instance
    pub check_resources_have_been_precached_on_first_fetch: bool,

    /// Keep the temp data of a failed install for the next attempt
    pub recover_installation_from_last_attempt: bool,

    /// Skip waiting after install
    pub immediately_activate_new_service_worker: bool,

    pub reload_all_pages_on_service_worker_activation: bool,

    /// Claim every page on activation
    pub immediately_take_control_of_all_pages: bool,

    pub reload_all_pages_after_immediately_taking_control_of_them: bool,

    /// Successive workers share temp data, so one can resume the install of another
    pub installation_temporary_data_sharing_enabled: bool,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            reject_service_worker_on_activation_fail: false,
            check_resources_have_been_precached_on_first_fetch: false,
            recover_installation_from_last_attempt: true,
            immediately_activate_new_service_worker: false,
            reload_all_pages_on_service_worker_activation: false,
            immediately_take_control_of_all_pages: false,
            reload_all_pages_after_immediately_taking_control_of_them: false,
            installation_temporary_data_sharing_enabled: false,
        }
    }
}

impl ServiceWorkerConfig {
    /// Default configuration for a worker script at `location`.
    pub fn new(location: Url) -> Self {
        Self {
            app_name: default_app_name(),
            service_worker_version: default_version(),
            cache_version: default_version(),
            refetch_from_network_version: default_version(),
            location,
            resource_urls_to_precache: Vec::new(),
            rules: PolicyRules::default(),
            flags: PolicyFlags::default(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check versions and app name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.is_empty() {
            return Err(ConfigError::EmptyAppName);
        }
        for (field, value) in [
            ("service_worker_version", self.service_worker_version),
            ("cache_version", self.cache_version),
            ("refetch_from_network_version", self.refetch_from_network_version),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidVersion { field, value });
            }
        }
        Ok(())
    }

    /// Whether temp generations are shared between workers.
    pub fn shares_temp_data(&self) -> bool {
        self.flags.installation_temporary_data_sharing_enabled
            && self.flags.recover_installation_from_last_attempt
    }

    /// Cache naming scheme for this configuration.
    pub fn identity(&self) -> CacheIdentity {
        CacheIdentity::new(
            self.app_name.clone(),
            ActiveVersions {
                cache: self.cache_version,
                worker: self.service_worker_version,
                refetch: self.refetch_from_network_version,
            },
            self.shares_temp_data(),
        )
    }

    /// Resolve the precache list against the worker location.
    pub fn resolve_precache_url(&self, resource: &str) -> Result<Url, ConfigError> {
        Ok(self.location.join(resource)?)
    }
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_version() -> u32 {
    1
}
