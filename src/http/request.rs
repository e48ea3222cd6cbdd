//! Incoming request view
//!
//! Wraps a hyper request together with the connection facts handlers
//! care about: which port accepted it, who sent it, and whether it
//! arrived over TLS.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Request, Uri, Version};

use crate::http::mime;
use crate::pattern::RequestPattern;

/// An incoming request, shared by every handler in the chain.
///
/// Cloning is cheap; clones view the same request. The body is held
/// behind a one-shot latch so exactly one handler may consume it.
#[derive(Clone)]
pub struct ServerRequest {
    inner: Arc<Inner>,
}

struct Inner {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    port: u16,
    peer: SocketAddr,
    secure: bool,
    body: Mutex<Option<Incoming>>,
}

impl ServerRequest {
    pub(crate) fn new(
        request: Request<Incoming>,
        port: u16,
        peer: SocketAddr,
        secure: bool,
    ) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, Some(body), port, peer, secure)
    }

    pub(crate) fn from_parts(
        parts: Parts,
        body: Option<Incoming>,
        port: u16,
        peer: SocketAddr,
        secure: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                port,
                peer,
                secure,
                body: Mutex::new(body),
            }),
        }
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Full request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Request pathname, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    /// Raw query string, if the request has one.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.inner.uri.query()
    }

    /// HTTP version the connection negotiated.
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// All request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// A single header value as text, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)?.to_str().ok()
    }

    /// The local port that accepted this connection.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Address of the remote peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Whether the connection arrived over TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    /// Content-Type implied by the request pathname's extension.
    #[must_use]
    pub fn content_type(&self) -> Option<&'static str> {
        mime::content_type_for_path(self.path())
    }

    /// MIME type implied by the request pathname's extension.
    #[must_use]
    pub fn mime_type(&self) -> Option<&'static str> {
        mime::mime_type_for_path(self.path())
    }

    /// Charset implied by the request pathname's extension.
    #[must_use]
    pub fn charset(&self) -> Option<&'static str> {
        mime::charset_for_path(self.path())
    }

    /// Check this request against a pattern string, parsed leniently.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        self.matches_pattern(&RequestPattern::parse_lenient(pattern))
    }

    /// Check this request against an already-built pattern.
    #[must_use]
    pub fn matches_pattern(&self, pattern: &RequestPattern) -> bool {
        pattern.matches(self.method().as_str(), self.port(), self.path())
    }

    /// Take the request body. Only the first caller gets it; later calls
    /// return `None`.
    #[must_use]
    pub fn take_body(&self) -> Option<Incoming> {
        self.inner.body.lock().ok().and_then(|mut body| body.take())
    }

    /// Collect the whole body into one buffer. Returns an empty buffer
    /// when the body was already taken.
    pub async fn body_bytes(&self) -> Result<Bytes, hyper::Error> {
        match self.take_body() {
            Some(body) => Ok(body.collect().await?.to_bytes()),
            None => Ok(Bytes::new()),
        }
    }
}

impl fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRequest")
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .field("port", &self.inner.port)
            .field("peer", &self.inner.peer)
            .field("secure", &self.inner.secure)
            .finish_non_exhaustive()
    }
}
