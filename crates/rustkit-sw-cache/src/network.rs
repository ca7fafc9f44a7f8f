//! Network transport seam.

use async_trait::async_trait;

use crate::error::NetworkError;
use crate::response::{Request, Response};

/// Performs network fetches on behalf of the worker.
///
/// A returned `Err` is a rejected fetch (offline, DNS, CORS). HTTP error
/// statuses are `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}
