//! Event loop delivering lifecycle and fetch events to a worker.
//!
//! ```text
//! HostHandle ──WorkerEvent──► ServiceWorkerHost::run
//!                                 ├── Install  ─► CacheWorker::install
//!                                 ├── Activate ─► CacheWorker::activate
//!                                 └── Fetch    ─► CacheWorker::handle_fetch
//! ```
//!
//! Each event runs as its own task; the responder of an event receives its
//! outcome once the task finishes. A panicking install or activate leaves the
//! worker redundant.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceWorkerError};
use crate::fetch::panic_message;
use crate::precache::PrecacheReport;
use crate::response::{Request, Response};
use crate::worker::CacheWorker;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script evaluated, no event received yet.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed or activation aborted.
    Redundant,
}

/// Events delivered by the host.
#[derive(Debug)]
pub enum WorkerEvent {
    Install {
        respond_to: oneshot::Sender<Result<PrecacheReport>>,
    },
    Activate {
        respond_to: oneshot::Sender<Result<()>>,
    },
    Fetch {
        request: Request,
        respond_to: oneshot::Sender<Response>,
    },
}

/// Runs a worker's event loop.
pub struct ServiceWorkerHost {
    worker: CacheWorker,
    state: Arc<RwLock<ServiceWorkerState>>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Sends events to a running [`ServiceWorkerHost`].
#[derive(Clone)]
pub struct HostHandle {
    events: mpsc::UnboundedSender<WorkerEvent>,
    state: Arc<RwLock<ServiceWorkerState>>,
}

impl ServiceWorkerHost {
    /// Create a host and the handle used to feed it events.
    pub fn new(worker: CacheWorker) -> (Self, HostHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ServiceWorkerState::Parsed));
        (
            Self {
                worker,
                state: state.clone(),
                events: rx,
            },
            HostHandle { events: tx, state },
        )
    }

    /// Process events until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let worker = self.worker.clone();
            let state = self.state.clone();
            match event {
                WorkerEvent::Install { respond_to } => {
                    tokio::spawn(async move {
                        *state.write().await = ServiceWorkerState::Installing;
                        let result = AssertUnwindSafe(worker.install())
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| Err(panicked("install", panic.as_ref())));
                        let next = match &result {
                            Ok(_) => ServiceWorkerState::Installed,
                            Err(err) => {
                                warn!(error = %err, category = err.category(), "Install failed");
                                ServiceWorkerState::Redundant
                            }
                        };
                        *state.write().await = next;
                        let _ = respond_to.send(result);
                    });
                }
                WorkerEvent::Activate { respond_to } => {
                    tokio::spawn(async move {
                        *state.write().await = ServiceWorkerState::Activating;
                        let result = AssertUnwindSafe(worker.activate())
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| Err(panicked("activate", panic.as_ref())));
                        *state.write().await = match &result {
                            Ok(()) => ServiceWorkerState::Activated,
                            Err(err) => {
                                warn!(error = %err, category = err.category(), "Activation failed");
                                ServiceWorkerState::Redundant
                            }
                        };
                        let _ = respond_to.send(result);
                    });
                }
                WorkerEvent::Fetch {
                    request,
                    respond_to,
                } => {
                    tokio::spawn(async move {
                        let response = worker.handle_fetch(request).await;
                        if respond_to.send(response).is_err() {
                            debug!("Fetch event dropped before the response was ready");
                        }
                    });
                }
            }
        }
        info!("Service worker host stopped");
    }
}

impl HostHandle {
    /// Current worker state.
    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Deliver an install event and wait for it to finish.
    pub async fn install(&self) -> Result<PrecacheReport> {
        let (respond_to, response) = oneshot::channel();
        self.send(WorkerEvent::Install { respond_to })?;
        response.await.map_err(|_| host_stopped())?
    }

    /// Deliver an activate event and wait for it to finish.
    pub async fn activate(&self) -> Result<()> {
        let (respond_to, response) = oneshot::channel();
        self.send(WorkerEvent::Activate { respond_to })?;
        response.await.map_err(|_| host_stopped())?
    }

    /// Deliver a fetch event and wait for the response.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let (respond_to, response) = oneshot::channel();
        self.send(WorkerEvent::Fetch {
            request,
            respond_to,
        })?;
        response.await.map_err(|_| host_stopped())
    }

    fn send(&self, event: WorkerEvent) -> Result<()> {
        self.events.send(event).map_err(|_| host_stopped())
    }
}

fn panicked(event: &str, panic: &(dyn Any + Send)) -> ServiceWorkerError {
    ServiceWorkerError::internal(format!("{event} panicked: {}", panic_message(panic)))
}

fn host_stopped() -> ServiceWorkerError {
    ServiceWorkerError::internal("service worker host stopped")
}
