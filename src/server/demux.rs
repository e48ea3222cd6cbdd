//! Protocol detection
//!
//! Every port serves HTTP and HTTPS at once. The first byte of a
//! connection is peeked without consuming it: a TLS handshake starts
//! with record type `0x16`, while every HTTP method starts with an
//! ASCII letter, so one byte is enough to tell them apart.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::dispatch::Dispatcher;
use crate::server::activity::{self, ActivityTracker, TrackedStream};
use crate::server::connection;

/// TLS content type for a handshake record.
const TLS_HANDSHAKE_BYTE: u8 = 0x16;

/// How long a connection may stay quiet before it is cut. Activity on
/// the socket in either direction restarts the clock.
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How accepted connections are served: the TLS acceptor for handshakes
/// and the dispatcher every request ends up at. One strategy is shared
/// by all listeners of a server; swapping certificates means building a
/// new strategy, already-bound listeners keep the one they were spawned
/// with.
pub(crate) struct AcceptStrategy {
    tls: TlsAcceptor,
    dispatcher: Arc<Dispatcher>,
}

impl AcceptStrategy {
    pub(crate) fn new(tls: TlsAcceptor, dispatcher: Arc<Dispatcher>) -> Self {
        Self { tls, dispatcher }
    }

    async fn accept_tls(&self, stream: TrackedStream<TcpStream>, peer: SocketAddr, port: u16) {
        match self.tls.accept(stream).await {
            Ok(stream) => {
                connection::serve(stream, Arc::clone(&self.dispatcher), port, peer, true).await;
            }
            Err(error) => {
                tracing::debug!(%peer, port, %error, "TLS handshake failed");
            }
        }
    }

    async fn accept_plaintext(
        &self,
        stream: TrackedStream<TcpStream>,
        peer: SocketAddr,
        port: u16,
    ) {
        connection::serve(stream, Arc::clone(&self.dispatcher), port, peer, false).await;
    }
}

/// Drive one accepted connection on its own task, cut once it has been
/// idle past the limit. Every byte the connection moves restarts the
/// idle clock, so a busy keep-alive connection is never interrupted.
pub(crate) fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    strategy: Arc<AcceptStrategy>,
) {
    tokio::spawn(async move {
        let tracker = Arc::new(ActivityTracker::new());
        tokio::select! {
            () = route(stream, peer, port, strategy, &tracker) => {}
            () = activity::idle_watch(&tracker, IDLE_TIMEOUT) => {
                tracing::debug!(%peer, port, "connection idle timeout");
            }
        }
    });
}

/// Peek the first byte and hand the untouched stream to the matching
/// protocol. The peeked byte stays in the socket buffer, so the TLS
/// handshake and hyper each see the stream from its true start. The
/// stream is wrapped after the peek, which means handshake bytes and
/// request traffic both count as activity while a silent peer does not.
async fn route(
    stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    strategy: Arc<AcceptStrategy>,
    tracker: &Arc<ActivityTracker>,
) {
    let mut first = [0_u8; 1];
    match stream.peek(&mut first).await {
        Ok(0) => {
            tracing::debug!(%peer, port, "connection closed before the first byte");
        }
        Ok(_) if first[0] == TLS_HANDSHAKE_BYTE => {
            let stream = TrackedStream::new(stream, Arc::clone(tracker));
            strategy.accept_tls(stream, peer, port).await;
        }
        Ok(_) => {
            let stream = TrackedStream::new(stream, Arc::clone(tracker));
            strategy.accept_plaintext(stream, peer, port).await;
        }
        Err(error) => {
            tracing::debug!(%peer, port, %error, "failed to peek connection");
        }
    }
}
