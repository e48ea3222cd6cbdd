//! Server front-end
//!
//! One `Server` owns a desired set of ports, the TLS material shared by
//! all of them, and the handler chain every request runs through. Each
//! bound port accepts HTTPS and plaintext HTTP on the same socket.

mod activity;
mod connection;
mod demux;
mod listener;
pub mod probe;
mod reconcile;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::dispatch::{Dispatcher, Handler, HandlerToken};
use crate::error::Error;
use crate::pattern::RequestPattern;
use crate::server::demux::AcceptStrategy;
use crate::server::listener::Listener;
use crate::server::reconcile::{reconcile, ReconcileContext};
use crate::tls::TlsMaterial;
use crate::Result;

/// Ports a server binds when none are configured.
pub const DEFAULT_PORTS: [u16; 2] = [80, 443];

/// Configuration for [`Server::new`].
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Address every port is bound on.
    pub host: IpAddr,
    /// Ports to bind when `listen` is called without its own list.
    pub port: Vec<u16>,
    /// Scan forward to the next free port when a bind conflicts.
    pub use_available_port: bool,
    /// Certificate chain in PEM form. Supplied together with `key`;
    /// when both are absent a self-signed certificate is generated.
    pub cert: Option<String>,
    /// Private key in PEM form.
    pub key: Option<String>,
    /// Reject malformed request patterns instead of widening them.
    pub strict_patterns: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORTS.to_vec(),
            use_available_port: false,
            cert: None,
            key: None,
            strict_patterns: false,
        }
    }
}

/// Per-call configuration for [`Server::listen`].
///
/// Anything left empty falls back to the server's current state, so
/// `server.listen(()).await` rebinds the configured ports and
/// `server.listen(8080).await` narrows to one port.
#[derive(Clone, Debug, Default)]
pub struct ListenOptions {
    /// Ports to bind; empty means the server's configured ports.
    pub port: Vec<u16>,
    /// Override the conflict-scan setting for this and later passes.
    pub use_available_port: Option<bool>,
    /// Replacement certificate chain in PEM form.
    pub cert: Option<String>,
    /// Replacement private key in PEM form.
    pub key: Option<String>,
}

impl From<()> for ListenOptions {
    fn from((): ()) -> Self {
        Self::default()
    }
}

impl From<u16> for ListenOptions {
    fn from(port: u16) -> Self {
        Self {
            port: vec![port],
            ..Self::default()
        }
    }
}

impl From<Vec<u16>> for ListenOptions {
    fn from(port: Vec<u16>) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

impl From<&[u16]> for ListenOptions {
    fn from(port: &[u16]) -> Self {
        Self {
            port: port.to_vec(),
            ..Self::default()
        }
    }
}

impl<const N: usize> From<[u16; N]> for ListenOptions {
    fn from(port: [u16; N]) -> Self {
        Self {
            port: port.to_vec(),
            ..Self::default()
        }
    }
}

/// An HTTP and HTTPS server sharing every bound port between the two
/// protocols.
pub struct Server {
    host: IpAddr,
    desired: Mutex<Vec<u16>>,
    bound: Mutex<BTreeMap<u16, Listener>>,
    use_available_port: AtomicBool,
    strict_patterns: bool,
    tls: Mutex<TlsMaterial>,
    dispatcher: Arc<Dispatcher>,
    // Serializes reconciliation passes; listen and close never overlap.
    pass_gate: AsyncMutex<()>,
    listening: Notify,
}

impl Server {
    /// Create a server. TLS material is prepared here, before any port
    /// is bound, so certificate problems surface immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the supplied PEM material is invalid, when
    /// only one of certificate and key is given, or when generating a
    /// self-signed certificate fails.
    pub fn new(options: ServerOptions) -> Result<Self> {
        let tls = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => TlsMaterial::from_pem(cert, key)?,
            (None, None) => TlsMaterial::generate()?,
            _ => {
                return Err(Error::Pem(
                    "certificate and key must be supplied together".to_owned(),
                ))
            }
        };
        Ok(Self {
            host: options.host,
            desired: Mutex::new(normalize_ports(&options.port)),
            bound: Mutex::new(BTreeMap::new()),
            use_available_port: AtomicBool::new(options.use_available_port),
            strict_patterns: options.strict_patterns,
            tls: Mutex::new(tls),
            dispatcher: Arc::new(Dispatcher::new()),
            pass_gate: AsyncMutex::new(()),
            listening: Notify::new(),
        })
    }

    /// Bind the desired ports, closing listeners that are no longer
    /// wanted and keeping those that are. Returns the converged port
    /// list; on failure the binds that did succeed stay up and the
    /// configured ports shrink to match them.
    ///
    /// # Errors
    ///
    /// Returns the first bind failure of the pass: `PortInUse` when a
    /// port is taken and scanning is off, or `Bind` for any other
    /// socket error. Supplied PEM material that fails to parse rejects
    /// the call before any port is touched.
    pub async fn listen<T: Into<ListenOptions>>(&self, target: T) -> Result<Vec<u16>> {
        let options = target.into();

        match (options.cert, options.key) {
            (Some(cert), Some(key)) => {
                let material = TlsMaterial::from_pem(&cert, &key)?;
                *lock(&self.tls) = material;
            }
            (None, None) => {}
            _ => {
                tracing::warn!(
                    "certificate and key must be supplied together; keeping current material"
                );
            }
        }
        if let Some(scan) = options.use_available_port {
            self.use_available_port.store(scan, Ordering::Relaxed);
        }

        let desired = if options.port.is_empty() {
            lock(&self.desired).clone()
        } else {
            normalize_ports(&options.port)
        };

        let _pass = self.pass_gate.lock().await;

        // Listeners spawned by this pass serve with the TLS material
        // current right now; already-bound ports keep theirs.
        let strategy = Arc::new(AcceptStrategy::new(
            lock(&self.tls).acceptor(),
            Arc::clone(&self.dispatcher),
        ));
        let context = ReconcileContext {
            host: self.host,
            use_available_port: self.use_available_port.load(Ordering::Relaxed),
            strategy,
            bound: &self.bound,
        };

        match reconcile(&context, desired).await {
            Ok(converged) => {
                *lock(&self.desired) = converged.clone();
                if !converged.is_empty() {
                    self.listening.notify_waiters();
                }
                Ok(converged)
            }
            Err(error) => {
                let converged: Vec<u16> = lock(&self.bound).keys().copied().collect();
                *lock(&self.desired) = converged;
                Err(error)
            }
        }
    }

    /// Unbind every port, resolving once all sockets are released. The
    /// configured ports are kept, so a later `listen(())` rebinds them.
    pub async fn close(&self) {
        let _pass = self.pass_gate.lock().await;
        let listeners: Vec<Listener> = {
            let mut bound = lock(&self.bound);
            std::mem::take(&mut *bound).into_values().collect()
        };
        if listeners.is_empty() {
            return;
        }
        join_all(listeners.into_iter().map(Listener::close)).await;
        tracing::info!("server closed");
    }

    /// Replace the configured ports. Rebinds immediately when the
    /// server is listening, otherwise just records them for the next
    /// `listen`.
    ///
    /// # Errors
    ///
    /// Propagates the reconciliation failure when a rebind is needed
    /// and a port cannot be bound.
    pub async fn set_ports<P: Into<Vec<u16>>>(&self, ports: P) -> Result<Vec<u16>> {
        let ports = normalize_ports(&ports.into());
        if self.is_listening() {
            self.listen(ports).await
        } else {
            *lock(&self.desired) = ports.clone();
            Ok(ports)
        }
    }

    /// Register a handler that sees every request.
    pub fn use_handler<H: Handler + 'static>(&self, handler: H) -> HandlerToken {
        self.dispatcher.add(None, Arc::new(handler))
    }

    /// Register a handler behind an already-built pattern.
    pub fn use_matching<H: Handler + 'static>(
        &self,
        pattern: RequestPattern,
        handler: H,
    ) -> HandlerToken {
        self.dispatcher.add(Some(pattern), Arc::new(handler))
    }

    /// Register a handler behind a pattern string such as
    /// `"GET|POST:8080 /api/**"`.
    ///
    /// # Errors
    ///
    /// With strict patterns enabled, returns the parse failure;
    /// otherwise malformed input widens toward match-all and this never
    /// fails.
    pub fn request<H: Handler + 'static>(
        &self,
        pattern: &str,
        handler: H,
    ) -> Result<HandlerToken> {
        let pattern = self.parse_pattern(pattern)?;
        Ok(self.dispatcher.add(Some(pattern), Arc::new(handler)))
    }

    /// Remove every registration whose pattern is structurally equal to
    /// the given one. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Same parsing behavior as [`Server::request`].
    pub fn remove_request(&self, pattern: &str) -> Result<usize> {
        let pattern = self.parse_pattern(pattern)?;
        Ok(self.dispatcher.remove_matching(&pattern))
    }

    /// Remove registrations matching the pattern and the exact handler
    /// the token names. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Same parsing behavior as [`Server::request`].
    pub fn remove_request_handler(&self, pattern: &str, token: &HandlerToken) -> Result<usize> {
        let pattern = self.parse_pattern(pattern)?;
        Ok(self.dispatcher.remove_handler(&pattern, token))
    }

    /// The configured ports, in the order they will be bound.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        lock(&self.desired).clone()
    }

    /// The ports currently bound, ascending.
    #[must_use]
    pub fn bound_ports(&self) -> Vec<u16> {
        lock(&self.bound).keys().copied().collect()
    }

    /// Whether at least one port is bound.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        !lock(&self.bound).is_empty()
    }

    /// Resolves after the next successful listen pass that leaves the
    /// server bound. The future must be created (and polled) before
    /// that pass to observe it.
    pub fn listening_changed(&self) -> Notified<'_> {
        self.listening.notified()
    }

    #[must_use]
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Current certificate chain in PEM form.
    #[must_use]
    pub fn cert_pem(&self) -> String {
        lock(&self.tls).cert_pem().to_owned()
    }

    /// Current private key in PEM form.
    #[must_use]
    pub fn key_pem(&self) -> String {
        lock(&self.tls).key_pem().to_owned()
    }

    fn parse_pattern(&self, pattern: &str) -> Result<RequestPattern> {
        if self.strict_patterns {
            RequestPattern::parse(pattern)
        } else {
            Ok(RequestPattern::parse_lenient(pattern))
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("host", &self.host)
            .field("ports", &self.ports())
            .field("bound", &self.bound_ports())
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}

/// Lock a std mutex, riding through poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop zero ports and duplicates, keeping first-occurrence order.
fn normalize_ports(ports: &[u16]) -> Vec<u16> {
    let mut normalized = Vec::with_capacity(ports.len());
    for &port in ports {
        if port == 0 {
            tracing::warn!("ignoring port 0 in desired port list");
            continue;
        }
        if !normalized.contains(&port) {
            normalized.push(port);
        }
    }
    normalized
}
