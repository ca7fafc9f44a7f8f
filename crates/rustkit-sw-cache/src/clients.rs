//! Client registry seam: the pages a worker controls.

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use url::Url;

use crate::error::ServiceWorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client (page or worker) in the scope of the service worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// A window client.
    pub fn window(id: impl Into<String>, url: Url, controlled: bool) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            controlled,
        }
    }
}

/// Operations the worker performs on its clients and its own registration.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Window clients controlled by this worker.
    async fn match_all(&self) -> Result<Vec<Client>, ServiceWorkerError>;

    /// Navigate a client, reloading it when `url` is its own URL.
    async fn navigate(&self, client_id: &str, url: &Url) -> Result<(), ServiceWorkerError>;

    /// Take control of every client in scope.
    async fn claim(&self) -> Result<(), ServiceWorkerError>;

    /// Activate without waiting for the previous worker's clients to close.
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError>;

    /// Unregister the worker. Returns whether a registration was removed.
    async fn unregister(&self) -> Result<bool, ServiceWorkerError>;
}

#[derive(Debug, Default)]
struct ClientsState {
    clients: HashMap<String, Client>,
    navigations: Vec<(String, Url)>,
    claimed: bool,
    skipped_waiting: bool,
    unregistered: bool,
}

/// In-memory [`ClientRegistry`] that records what was done to it.
#[derive(Debug, Default)]
pub struct Clients {
    state: RwLock<ClientsState>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.state
            .write()
            .await
            .clients
            .insert(client.id.clone(), client);
    }

    /// Navigations performed so far, in order.
    pub async fn navigations(&self) -> Vec<(String, Url)> {
        self.state.read().await.navigations.clone()
    }

    pub async fn claimed(&self) -> bool {
        self.state.read().await.claimed
    }

    pub async fn skipped_waiting(&self) -> bool {
        self.state.read().await.skipped_waiting
    }

    pub async fn unregistered(&self) -> bool {
        self.state.read().await.unregistered
    }
}

#[async_trait]
impl ClientRegistry for Clients {
    async fn match_all(&self) -> Result<Vec<Client>, ServiceWorkerError> {
        let state = self.state.read().await;
        let mut clients: Vec<Client> = state
            .clients
            .values()
            .filter(|c| c.controlled && c.client_type == ClientType::Window)
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clients)
    }

    async fn navigate(&self, client_id: &str, url: &Url) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        let client = state
            .clients
            .get_mut(client_id)
            .ok_or_else(|| ServiceWorkerError::clients(format!("no client {client_id}")))?;
        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::clients(
                "Can only navigate window clients",
            ));
        }
        client.url = url.clone();
        state.navigations.push((client_id.to_string(), url.clone()));
        Ok(())
    }

    async fn claim(&self) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        for client in state.clients.values_mut() {
            client.controlled = true;
        }
        state.claimed = true;
        Ok(())
    }

    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.state.write().await.skipped_waiting = true;
        Ok(())
    }

    async fn unregister(&self) -> Result<bool, ServiceWorkerError> {
        let mut state = self.state.write().await;
        let removed = !state.unregistered;
        state.unregistered = true;
        Ok(removed)
    }
}
