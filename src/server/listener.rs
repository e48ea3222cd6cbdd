//! Port listeners
//!
//! One `Listener` per bound port: the socket plus the accept task that
//! hands every connection to the protocol demultiplexer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::server::demux::{self, AcceptStrategy};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Create a `TcpListener` bound to the given address.
///
/// `SO_REUSEADDR` lets a freshly restarted server rebind a port whose
/// old socket is still in TIME_WAIT. `SO_REUSEPORT` is not set: a
/// second bind of a live port must fail so conflicts are noticed.
///
/// # Arguments
///
/// * `addr` - The socket address to bind to
pub(crate) fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    // Create socket with appropriate domain (IPv4 or IPv6)
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;

    // Set non-blocking mode for async compatibility
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;

    // Start listening with a backlog queue size of 128
    socket.listen(128)?;

    // Convert socket2::Socket to std::net::TcpListener, then to tokio::net::TcpListener
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// A bound port together with its running accept loop.
///
/// Dropping a `Listener` aborts the loop and releases the port; the
/// accept strategy it was spawned with goes away along with the task.
pub(crate) struct Listener {
    id: u64,
    port: u16,
    task: JoinHandle<()>,
}

impl Listener {
    /// Start accepting on an already-bound socket.
    pub(crate) fn spawn(port: u16, socket: TcpListener, strategy: Arc<AcceptStrategy>) -> Self {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(accept_loop(id, port, socket, strategy));
        tracing::info!(id, port, "listener bound");
        Self { id, port, task }
    }

    /// Identifies this bind across its lifetime; a port that is closed
    /// and reopened gets a new id.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Stop accepting and wait until the socket is released.
    /// Connections already handed off keep running.
    pub(crate) async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        tracing::info!(id = self.id, port = self.port, "listener closed");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(id: u64, port: u16, socket: TcpListener, strategy: Arc<AcceptStrategy>) {
    loop {
        match socket.accept().await {
            Ok((stream, peer)) => {
                demux::spawn_connection(stream, peer, port, Arc::clone(&strategy));
            }
            Err(error) => {
                tracing::warn!(id, port, %error, "failed to accept connection");
            }
        }
    }
}
