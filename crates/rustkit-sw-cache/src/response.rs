//! Request and response model.
//!
//! Response bodies are single-use: a [`Response`] is not `Clone`, and the only
//! way to hand the same response to both the cache and the page is [`Response::tee`].

use std::fmt;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method};
use url::Url;

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }

    /// Create a HEAD request.
    pub fn head(url: Url) -> Self {
        Self::get(url).with_method(Method::HEAD)
    }

    /// Replace the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// URL as a string, the form rule sets match against.
    pub fn url_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Response type as exposed by the fetch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Default,
    Error,
    /// Cross-origin no-cors response.
    Opaque,
    OpaqueRedirect,
}

/// A single-use response body.
pub struct Body(Option<Bytes>);

impl Body {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(Some(bytes.into()))
    }

    /// Whether the body was already read.
    pub fn is_used(&self) -> bool {
        self.0.is_none()
    }

    /// Read the body. Subsequent reads return `None`.
    pub fn take(&mut self) -> Option<Bytes> {
        self.0.take()
    }

    /// Split into two independent bodies with the same content.
    pub fn tee(self) -> (Body, Body) {
        let copy = self.0.clone();
        (self, Body(copy))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(bytes) => write!(f, "Body({} bytes)", bytes.len()),
            None => f.write_str("Body(used)"),
        }
    }
}

/// A response, either from the network, from a cache or synthesized.
#[derive(Debug)]
pub struct Response {
    /// Status code. Opaque responses report 0.
    pub status: u16,
    pub response_type: ResponseType,
    pub headers: HeaderMap,
    /// Final URL, if known.
    pub url: Option<Url>,
    body: Body,
}

impl Response {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            response_type: ResponseType::Basic,
            headers: HeaderMap::new(),
            url: None,
            body: Body::new(body),
        }
    }

    /// A `200` response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// A `text/plain` response.
    pub fn text(status: u16, message: impl Into<String>) -> Self {
        let mut response = Self::new(status, message.into());
        response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }

    /// An opaque response: status 0, empty unreadable body.
    pub fn opaque() -> Self {
        Self::new(0, Bytes::new()).with_type(ResponseType::Opaque)
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Add a header.
    pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Definite success: status 200.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Opaque cross-origin response.
    pub fn is_opaque(&self) -> bool {
        self.status == 0
            && matches!(
                self.response_type,
                ResponseType::Opaque | ResponseType::OpaqueRedirect
            )
    }

    /// Whether this response can be stored in a cache.
    pub fn is_cacheable(&self, opaque_allowed: bool) -> bool {
        self.is_ok() || (opaque_allowed && self.is_opaque())
    }

    /// Duplicate the response so both copies can be consumed independently.
    pub fn tee(self) -> (Response, Response) {
        let (body, copy) = self.body.tee();
        let copy = Response {
            status: self.status,
            response_type: self.response_type,
            headers: self.headers.clone(),
            url: self.url.clone(),
            body: copy,
        };
        (
            Response {
                status: self.status,
                response_type: self.response_type,
                headers: self.headers,
                url: self.url,
                body,
            },
            copy,
        )
    }

    /// Consume the body.
    pub fn bytes(mut self) -> Bytes {
        self.body.take().unwrap_or_default()
    }

    /// Consume the body as text.
    pub fn text_body(self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Content type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}
