//! Outgoing response state
//!
//! Handlers share one mutable response per request. The response
//! accumulates status, headers, and body until a handler ends it, at
//! which point later handlers in the chain are skipped.

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Response, StatusCode};

use crate::http::files::{self, SendFileOptions};
use crate::http::mime;
use crate::http::request::ServerRequest;

/// Error type handlers are allowed to fail with.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// The response being assembled for one request.
///
/// Cloning is cheap; clones share the same underlying state, which is
/// how the dispatcher and every handler observe each other's writes.
#[derive(Clone)]
pub struct ServerResponse {
    state: Arc<Mutex<State>>,
}

struct State {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    finished: bool,
    error: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ServerResponse {
    /// A fresh response: status 200, no headers, empty body, unfinished.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Vec::new(),
                finished: false,
                error: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock still holds consistent state; every mutation
        // completes within a single lock scope.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    /// Set the status code. Invalid codes and writes after the response
    /// has finished are ignored.
    pub fn set_status(&self, status: u16) -> &Self {
        let mut state = self.state();
        if state.finished {
            tracing::debug!(status, "status change after response finished; ignoring");
            return self;
        }
        match StatusCode::from_u16(status) {
            Ok(code) => state.status = code,
            Err(_) => tracing::debug!(status, "invalid status code; ignoring"),
        }
        self
    }

    /// Look up a header already set on this response.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let state = self.state();
        let value = state.headers.get(name)?;
        value.to_str().ok().map(str::to_string)
    }

    /// Snapshot of all headers set so far.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.state().headers.clone()
    }

    /// Set a header, replacing any previous value under the same name.
    /// Unparseable names or values are ignored.
    pub fn set_header(&self, name: &str, value: &str) -> &Self {
        let mut state = self.state();
        if state.finished {
            tracing::debug!(name, "header change after response finished; ignoring");
            return self;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                state.headers.insert(name, value);
            }
            _ => tracing::debug!(name, value, "invalid header; ignoring"),
        }
        self
    }

    /// Remove a header if it was set.
    pub fn remove_header(&self, name: &str) -> &Self {
        let mut state = self.state();
        if !state.finished {
            if let Ok(name) = HeaderName::try_from(name) {
                state.headers.remove(name);
            }
        }
        self
    }

    /// Append bytes to the response body. Writes after the response has
    /// finished are ignored.
    pub fn write(&self, data: impl AsRef<[u8]>) -> &Self {
        let mut state = self.state();
        if state.finished {
            tracing::debug!("body write after response finished; ignoring");
            return self;
        }
        state.body.extend_from_slice(data.as_ref());
        self
    }

    /// Mark the response finished. Later handlers in the chain will be
    /// skipped. Idempotent.
    pub fn end(&self) {
        self.state().finished = true;
    }

    /// Append a final body chunk and finish the response.
    pub fn send(&self, body: impl AsRef<[u8]>) {
        self.write(body);
        self.end();
    }

    /// Finish the response with a bare status code and no body.
    pub fn send_status(&self, status: u16) {
        self.set_status(status);
        self.end();
    }

    /// Send an HTML body with the matching Content-Type.
    pub fn send_html(&self, body: impl AsRef<[u8]>) {
        self.set_header("Content-Type", mime::get_content_type(Some("html")));
        self.send(body);
    }

    /// Send a CSS body with the matching Content-Type.
    pub fn send_css(&self, body: impl AsRef<[u8]>) {
        self.set_header("Content-Type", mime::get_content_type(Some("css")));
        self.send(body);
    }

    /// Send a JavaScript body with the matching Content-Type.
    pub fn send_js(&self, body: impl AsRef<[u8]>) {
        self.set_header("Content-Type", mime::get_content_type(Some("js")));
        self.send(body);
    }

    /// Serialize a value as JSON and send it with the matching
    /// Content-Type.
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.set_header("Content-Type", mime::get_content_type(Some("json")));
        self.send(body);
        Ok(())
    }

    /// Finish with a 302 redirect to the given location.
    pub fn redirect(&self, location: &str) {
        self.redirect_with(302, location);
    }

    /// Finish with a redirect using an explicit status code.
    pub fn redirect_with(&self, status: u16, location: &str) {
        self.set_status(status);
        self.set_header("Location", location);
        self.end();
    }

    /// Serve a file from disk, honoring `If-Modified-Since` and `HEAD`.
    ///
    /// The pathname is resolved under `options.from`; requests that
    /// escape that directory are refused as not found.
    pub async fn send_file(
        &self,
        request: &ServerRequest,
        path: &str,
        options: &SendFileOptions,
    ) -> crate::Result<()> {
        let stats = files::resolve_path_stats(path, options).await?;
        let last_modified = stats.modified.map(files::http_date);

        if let (Some(since), Some(modified)) = (
            request.header("if-modified-since"),
            last_modified.as_deref(),
        ) {
            if since == modified {
                self.set_status(304);
                self.end();
                return Ok(());
            }
        }

        self.set_header("Content-Type", stats.content_type);
        self.set_header("Content-Length", &stats.len.to_string());
        self.set_header("Date", &files::http_date(SystemTime::now()));
        if let Some(modified) = &last_modified {
            self.set_header("Last-Modified", modified);
        }

        if request.method() == Method::HEAD {
            self.end();
        } else {
            let data = tokio::fs::read(&stats.path).await?;
            self.send(data);
        }
        Ok(())
    }

    /// Whether a handler has finished this response.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.state().finished
    }

    /// The most recent error a handler failed with, if any.
    #[must_use]
    pub fn error(&self) -> Option<Arc<dyn StdError + Send + Sync>> {
        self.state().error.clone()
    }

    pub(crate) fn set_error(&self, error: HandlerError) {
        self.state().error = Some(Arc::from(error));
    }

    /// Drain the accumulated state into a hyper response.
    pub(crate) fn finalize(&self) -> Response<Full<Bytes>> {
        let (status, headers, body) = {
            let mut state = self.state();
            (
                state.status,
                std::mem::take(&mut state.headers),
                std::mem::take(&mut state.body),
            )
        };
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl Default for ServerResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ServerResponse")
            .field("status", &state.status)
            .field("finished", &state.finished)
            .field("has_error", &state.error.is_some())
            .finish_non_exhaustive()
    }
}

/// Build 404 Not Found response
pub fn build_404_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(404)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from("404 Not Found")))
        .unwrap_or_else(|e| {
            log_build_error("404", &e);
            Response::new(Full::new(Bytes::from("404 Not Found")))
        })
}

/// Build 500 Internal Server Error response
pub fn build_500_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(500)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from("500 Internal Server Error")))
        .unwrap_or_else(|e| {
            log_build_error("500", &e);
            Response::new(Full::new(Bytes::from("500 Internal Server Error")))
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    tracing::error!(status, %error, "failed to build response");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_response_defaults() {
        let response = ServerResponse::new();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.finished());
        assert!(response.error().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let response = ServerResponse::new();
        let other = response.clone();
        other.set_status(418).set_header("X-Tea", "yes");
        response.end();

        assert_eq!(other.status().as_u16(), 418);
        assert_eq!(response.header("x-tea").as_deref(), Some("yes"));
        assert!(other.finished());
    }

    #[test]
    fn test_writes_ignored_after_end() {
        let response = ServerResponse::new();
        response.send("done");
        response
            .write("more")
            .set_status(500)
            .set_header("X-Late", "1");

        let finalized = response.finalize();
        assert_eq!(finalized.status(), StatusCode::OK);
        assert!(finalized.headers().get("X-Late").is_none());
    }

    #[test]
    fn test_send_accumulates_previous_writes() {
        let response = ServerResponse::new();
        response.write("hello ").write("wor");
        response.send("ld");
        assert!(response.finished());
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let response = ServerResponse::new();
        response
            .set_header("Bad\nName", "value")
            .set_header("Good", "value");
        assert_eq!(response.header("Good").as_deref(), Some("value"));
    }

    #[test]
    fn test_redirect_sets_location() {
        let response = ServerResponse::new();
        response.redirect("/elsewhere");
        assert_eq!(response.status().as_u16(), 302);
        assert_eq!(response.header("location").as_deref(), Some("/elsewhere"));
        assert!(response.finished());
    }

    #[test]
    fn test_send_json_sets_content_type() {
        let response = ServerResponse::new();
        response
            .send_json(&serde_json::json!({ "ok": true }))
            .unwrap();
        assert_eq!(
            response.header("content-type").as_deref(),
            Some("application/json; charset=utf-8")
        );
        assert!(response.finished());
    }

    #[test]
    fn test_typed_senders_set_content_type() {
        let html = ServerResponse::new();
        html.send_html("<p>hi</p>");
        assert_eq!(
            html.header("content-type").as_deref(),
            Some("text/html; charset=utf-8")
        );
        assert!(html.finished());

        let css = ServerResponse::new();
        css.send_css("p { color: red }");
        assert_eq!(
            css.header("content-type").as_deref(),
            Some("text/css; charset=utf-8")
        );
        assert!(css.finished());

        let js = ServerResponse::new();
        js.send_js("console.log(1)");
        assert_eq!(
            js.header("content-type").as_deref(),
            Some("application/javascript; charset=utf-8")
        );
        assert!(js.finished());
    }

    #[test]
    fn test_latest_error_wins() {
        let response = ServerResponse::new();
        response.set_error("first".into());
        response.set_error("second".into());
        assert_eq!(response.error().unwrap().to_string(), "second");
    }

    fn file_request(method: &str, headers: &[(&str, &str)]) -> ServerRequest {
        let mut builder = hyper::Request::builder().method(method).uri("/page.html");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        ServerRequest::from_parts(parts, None, 80, "127.0.0.1:40000".parse().unwrap(), false)
    }

    fn file_root(tag: &str) -> SendFileOptions {
        let dir = std::env::temp_dir().join(format!(
            "polyport-response-{tag}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("page.html"), "<p>hi</p>").unwrap();
        SendFileOptions {
            from: dir,
            ..SendFileOptions::default()
        }
    }

    #[tokio::test]
    async fn test_send_file_sets_metadata_headers() {
        let options = file_root("metadata");
        let response = ServerResponse::new();
        response
            .send_file(&file_request("GET", &[]), "/page.html", &options)
            .await
            .unwrap();

        assert!(response.finished());
        assert_eq!(
            response.header("content-type").as_deref(),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(response.header("content-length").as_deref(), Some("9"));
        assert!(response.header("last-modified").is_some());
    }

    #[tokio::test]
    async fn test_send_file_if_modified_since_yields_304() {
        let options = file_root("conditional");
        let stats = files::resolve_path_stats("/page.html", &options)
            .await
            .unwrap();
        let modified = files::http_date(stats.modified.unwrap());

        let response = ServerResponse::new();
        response
            .send_file(
                &file_request("GET", &[("if-modified-since", modified.as_str())]),
                "/page.html",
                &options,
            )
            .await
            .unwrap();

        assert!(response.finished());
        assert_eq!(response.status().as_u16(), 304);
        assert!(response.header("content-length").is_none());
    }

    #[tokio::test]
    async fn test_send_file_head_omits_body() {
        let options = file_root("head");
        let response = ServerResponse::new();
        response
            .send_file(&file_request("HEAD", &[]), "/page.html", &options)
            .await
            .unwrap();

        assert_eq!(response.header("content-length").as_deref(), Some("9"));
        let finalized = response.finalize();
        let body = http_body_util::BodyExt::collect(finalized.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert!(body.is_empty());
    }

    #[test]
    fn test_finalize_carries_status_headers_body() {
        let response = ServerResponse::new();
        response.set_status(201).set_header("X-Id", "7");
        response.send("created");

        let finalized = response.finalize();
        assert_eq!(finalized.status(), StatusCode::CREATED);
        assert_eq!(finalized.headers().get("X-Id").unwrap(), "7");
    }
}
