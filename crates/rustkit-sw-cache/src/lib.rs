//! # RustKit Service Worker Cache
//!
//! Caching policy engine for a service worker: decides, for every intercepted
//! request, whether to answer from the cache or the network, what to store,
//! and how cache generations migrate between worker versions.
//!
//! ## Features
//!
//! - **URL rules**: include/exclude regex rule sets for every policy axis
//! - **Fetch strategies**: network first, cache first, background refresh,
//!   offline fallback with relaxed matching
//! - **Precache**: concurrent fetch of a fixed resource list on install
//! - **Versioned generations**: current, temp and refetch-checklist caches
//!   rotated on activate
//! - **Refetch checklist**: force a one-time network refresh per version
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost (event loop)
//!     │
//!     └── CacheWorker
//!             ├── fetch       (per-request decision)
//!             ├── precache    (install / first fetch)
//!             ├── lifecycle   (install, activate)
//!             ├── checklist   (refetch markers)
//!             └── identity    (generation names)
//!
//! CacheStorage ── Cache ── Request → Response
//! Network      ── fetch(Request) → Response
//! ClientRegistry (controlled pages)
//! ```

pub mod checklist;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetch;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod matcher;
pub mod network;
pub mod precache;
pub mod response;
pub mod store;
pub mod worker;

pub use clients::{Client, ClientRegistry, ClientType, Clients};
pub use config::{PolicyFlags, PolicyRules, ServiceWorkerConfig};
pub use error::{CacheError, ConfigError, NetworkError, Result, ServiceWorkerError};
pub use host::{HostHandle, ServiceWorkerHost, ServiceWorkerState, WorkerEvent};
pub use identity::{ActiveVersions, CacheIdentity, Generation, GenerationKind};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use matcher::{is_included, RuleSet, RuleSetPatterns, UrlPredicate};
pub use network::Network;
pub use precache::{PrecacheOptions, PrecacheOutcome, PrecacheReport};
pub use response::{Body, Request, Response, ResponseType};
pub use store::{Cache, CacheResult, CacheStorage, MatchOptions, MemoryCache, MemoryCacheStorage};
pub use worker::CacheWorker;
