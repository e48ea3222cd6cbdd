//! Handler chain dispatch
//!
//! Requests flow through every registered handler in registration
//! order. A handler may finish the response, in which case the rest of
//! the chain is skipped; a handler that fails is recorded on the
//! response and the chain continues.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};

use crate::http::response::{build_404_response, build_500_response};
use crate::http::{HandlerError, ServerRequest, ServerResponse};
use crate::pattern::RequestPattern;

/// A request handler.
///
/// Implemented for every `Fn(ServerRequest, ServerResponse)` returning
/// a future, so plain async closures register directly.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        request: ServerRequest,
        response: ServerResponse,
    ) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(ServerRequest, ServerResponse) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(
        &self,
        request: ServerRequest,
        response: ServerResponse,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(request, response))
    }
}

/// Names a registered handler so that exactly that registration can be
/// removed later. Tokens compare by handler identity, not by value.
#[derive(Clone)]
pub struct HandlerToken(pub(crate) Arc<dyn Handler>);

impl HandlerToken {
    fn is(&self, handler: &Arc<dyn Handler>) -> bool {
        Arc::ptr_eq(&self.0, handler)
    }
}

impl std::fmt::Debug for HandlerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HandlerToken")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

#[derive(Clone)]
struct Registration {
    pattern: Option<RequestPattern>,
    handler: Arc<dyn Handler>,
}

/// Ordered list of handler registrations plus the request loop that
/// walks them.
#[derive(Default)]
pub(crate) struct Dispatcher {
    registrations: RwLock<Vec<Registration>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a registration. `None` for the pattern means the handler
    /// sees every request.
    pub(crate) fn add(
        &self,
        pattern: Option<RequestPattern>,
        handler: Arc<dyn Handler>,
    ) -> HandlerToken {
        let token = HandlerToken(Arc::clone(&handler));
        self.write().push(Registration { pattern, handler });
        token
    }

    /// Remove every registration whose pattern equals the given one.
    /// Returns how many were removed.
    pub(crate) fn remove_matching(&self, pattern: &RequestPattern) -> usize {
        let mut registrations = self.write();
        let before = registrations.len();
        registrations.retain(|r| r.pattern.as_ref() != Some(pattern));
        before - registrations.len()
    }

    /// Remove registrations matching both the pattern and the handler
    /// the token names. Returns how many were removed.
    pub(crate) fn remove_handler(&self, pattern: &RequestPattern, token: &HandlerToken) -> usize {
        let mut registrations = self.write();
        let before = registrations.len();
        registrations.retain(|r| r.pattern.as_ref() != Some(pattern) || !token.is(&r.handler));
        before - registrations.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    /// Run the chain for one request.
    ///
    /// The registration list is snapshotted up front, so handlers that
    /// register or remove handlers only affect later requests.
    pub(crate) async fn run(&self, request: &ServerRequest, response: &ServerResponse) {
        let snapshot = self.read().clone();
        for registration in snapshot {
            if response.finished() {
                break;
            }
            if let Some(pattern) = &registration.pattern {
                if !request.matches_pattern(pattern) {
                    continue;
                }
            }
            if let Err(error) = registration
                .handler
                .call(request.clone(), response.clone())
                .await
            {
                tracing::debug!(%error, "handler failed; continuing the chain");
                response.set_error(error);
            }
        }
    }

    /// Serve one hyper request through the chain.
    pub(crate) async fn dispatch(
        &self,
        request: Request<Incoming>,
        port: u16,
        peer: SocketAddr,
        secure: bool,
    ) -> Response<Full<Bytes>> {
        let request = ServerRequest::new(request, port, peer, secure);
        let response = ServerResponse::new();
        self.run(&request, &response).await;
        respond(&response)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Registration>> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Registration>> {
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Turn the chain's outcome into the wire response: what a handler
/// finished wins; an unhandled failure is a 500; an untouched request
/// is a 404.
fn respond(response: &ServerResponse) -> Response<Full<Bytes>> {
    if response.finished() {
        return response.finalize();
    }
    if let Some(error) = response.error() {
        tracing::error!(%error, "handler chain failed without finishing the response");
        return build_500_response();
    }
    build_404_response()
}
