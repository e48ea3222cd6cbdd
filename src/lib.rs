//! HTTP and HTTPS served on the same ports.
//!
//! A [`Server`] binds any number of TCP ports and answers both
//! protocols on every one of them: the first byte of each connection
//! decides between a TLS handshake and plaintext HTTP/1.1, so
//! `https://host:8080` and `http://host:8080` are the same listener.
//! Handlers are registered once and see requests from every port,
//! optionally narrowed by a pattern over method, port and pathname.
//!
//! ```no_run
//! use polyport::{HandlerError, Server, ServerOptions, ServerRequest, ServerResponse};
//!
//! # async fn run() -> polyport::Result<()> {
//! let server = Server::new(ServerOptions::default())?;
//! server.request("GET /hello", |_request: ServerRequest, response: ServerResponse| {
//!     async move {
//!         response.send("hello");
//!         Ok::<(), HandlerError>(())
//!     }
//! })?;
//! server.listen([8080, 8443]).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod pattern;
pub mod server;
pub mod tls;

pub use dispatch::{Handler, HandlerToken};
pub use error::{Error, Result};
pub use http::files::{resolve_path_stats, FileStats, SendFileOptions};
pub use http::mime::{charset_for_path, content_type_for_path, mime_type_for_path};
pub use http::{HandlerError, ServerRequest, ServerResponse};
pub use pattern::{GlobMatcher, RequestPattern};
pub use server::probe::{first_available, probe};
pub use server::{ListenOptions, Server, ServerOptions, DEFAULT_PORTS};
pub use tls::{generate_certificate, CertificateOptions, CertificatePair, TlsMaterial};
