//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::header::VARY;
use http::HeaderValue;
use rustkit_sw_cache::{
    Cache, CacheError, CacheResult, CacheStorage, CacheWorker, Clients, MatchOptions,
    MemoryCacheStorage, Network, NetworkError, Request, Response, ServiceWorkerConfig,
};
use url::Url;

pub const LOCATION: &str = "https://example.com/game/sw.js";

pub fn location() -> Url {
    Url::parse(LOCATION).unwrap()
}

pub fn url(path: &str) -> Url {
    location().join(path).unwrap()
}

pub fn config() -> ServiceWorkerConfig {
    ServiceWorkerConfig::new(location())
}

// ==================== Network ====================

#[derive(Debug, Clone)]
enum Script {
    Status(u16, String),
    Varying(String, &'static str),
    Opaque,
    Fail(String),
    Panic,
}

#[derive(Debug, Default)]
struct NetworkState {
    scripts: HashMap<String, Script>,
    calls: Vec<String>,
    offline: bool,
}

/// Scripted network counting every fetch.
///
/// Unscripted URLs answer `200` with the URL as body.
#[derive(Debug, Default)]
pub struct MockNetwork {
    state: Mutex<NetworkState>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, url: &Url, script: Script) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(url.to_string(), script);
    }

    pub fn serve(&self, url: &Url, status: u16, body: &str) {
        self.script(url, Script::Status(status, body.to_string()));
    }

    /// Serve `200` with a `Vary` header naming `vary`.
    pub fn serve_varying(&self, url: &Url, body: &str, vary: &'static str) {
        self.script(url, Script::Varying(body.to_string(), vary));
    }

    pub fn serve_opaque(&self, url: &Url) {
        self.script(url, Script::Opaque);
    }

    pub fn fail(&self, url: &Url) {
        self.script(url, Script::Fail("connection refused".into()));
    }

    pub fn panic_on(&self, url: &Url) {
        self.script(url, Script::Panic);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn calls(&self, url: &Url) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.iter().filter(|c| c.as_str() == url.as_str()).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(request.url.to_string());
            if state.offline {
                Some(Script::Fail("offline".into()))
            } else {
                state.scripts.get(request.url.as_str()).cloned()
            }
        };

        match script {
            None => Ok(Response::ok(request.url.to_string()).with_url(request.url.clone())),
            Some(Script::Status(status, body)) => Ok(Response::new(status, body)),
            Some(Script::Varying(body, vary)) => {
                Ok(Response::ok(body).header(VARY, HeaderValue::from_static(vary)))
            }
            Some(Script::Opaque) => Ok(Response::opaque()),
            Some(Script::Fail(message)) => Err(NetworkError::request_failed(message)),
            Some(Script::Panic) => panic!("transport exploded"),
        }
    }
}

// ==================== Storage ====================

/// Storage wrapper that can be told to fail some operations.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryCacheStorage,
    fail_puts: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
}

impl FailingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every put into `cache_id` fail.
    pub fn fail_puts_into(&self, cache_id: &str) {
        self.fail_puts.lock().unwrap().insert(cache_id.to_string());
    }

    /// Make every lookup fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

struct FailingCache {
    inner: Arc<dyn Cache>,
    fail_put: bool,
    fail_reads: bool,
}

#[async_trait]
impl Cache for FailingCache {
    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> CacheResult<Option<Response>> {
        if self.fail_reads {
            return Err(CacheError::storage("read failure"));
        }
        self.inner.match_request(request, options).await
    }

    async fn put(&self, request: &Request, response: Response) -> CacheResult<()> {
        if self.fail_put {
            return Err(CacheError::storage("quota exceeded"));
        }
        self.inner.put(request, response).await
    }

    async fn keys(&self) -> CacheResult<Vec<Request>> {
        self.inner.keys().await
    }

    async fn delete(&self, request: &Request) -> CacheResult<bool> {
        self.inner.delete(request).await
    }
}

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>> {
        let inner = self.inner.open(name).await?;
        let fail_put = self.fail_puts.lock().unwrap().contains(name);
        Ok(Arc::new(FailingCache {
            inner,
            fail_put,
            fail_reads: self.fail_reads.load(Ordering::SeqCst),
        }))
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        self.inner.delete(name).await
    }
}

// ==================== Helpers ====================

pub struct Harness {
    pub worker: CacheWorker,
    pub network: Arc<MockNetwork>,
    pub clients: Arc<Clients>,
}

pub fn harness(
    config: ServiceWorkerConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<MockNetwork>,
) -> Harness {
    let clients = Arc::new(Clients::new());
    let worker = CacheWorker::new(config, storage, network.clone(), clients.clone()).unwrap();
    Harness {
        worker,
        network,
        clients,
    }
}

/// Cache names in the store, sorted.
pub async fn cache_names(storage: &dyn CacheStorage) -> Vec<String> {
    let mut names = storage.keys().await.unwrap();
    names.sort();
    names
}

/// Poll until `check` holds, giving detached tasks time to run.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
