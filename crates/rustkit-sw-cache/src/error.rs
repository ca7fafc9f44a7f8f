//! Error types for the service worker cache engine.

use thiserror::Error;

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

/// Errors raised by a cache store.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),
}

impl CacheError {
    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// Errors raised by the network transport.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Fetch from network is not allowed: {0}")]
    NotAllowed(String),
}

impl NetworkError {
    /// Create a request failure.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed(message.into())
    }
}

/// Errors raised while building or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{field} must be an integer greater than 0, got {value}")]
    InvalidVersion { field: &'static str, value: u32 },

    #[error("App name must not be empty")]
    EmptyAppName,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("The service worker is not allowed to be installed on the current location: {0}")]
    InstallRejected(String),

    #[error("Failed to fetch resource to precache: {0}")]
    PrecacheFailed(String),

    #[error("Activation aborted: {0}")]
    ActivationAborted(String),

    #[error("Clients error: {0}")]
    Clients(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceWorkerError {
    /// Create a clients error.
    pub fn clients(message: impl Into<String>) -> Self {
        Self::Clients(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error makes the whole installation fail.
    pub fn is_fatal_to_install(&self) -> bool {
        matches!(
            self,
            ServiceWorkerError::InstallRejected(_)
                | ServiceWorkerError::PrecacheFailed(_)
                | ServiceWorkerError::Cache(_)
        )
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            ServiceWorkerError::InstallRejected(_) => "install_rejected",
            ServiceWorkerError::PrecacheFailed(_) => "precache",
            ServiceWorkerError::ActivationAborted(_) => "activation",
            ServiceWorkerError::Clients(_) => "clients",
            ServiceWorkerError::Internal(_) => "internal",
            ServiceWorkerError::Cache(_) => "cache",
            ServiceWorkerError::Network(_) => "network",
            ServiceWorkerError::Config(_) => "config",
        }
    }
}
