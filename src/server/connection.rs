//! HTTP connection serving
//!
//! The transport is abstract here: a plaintext TCP stream and a
//! finished TLS session are served identically.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dispatch::Dispatcher;

/// Serve HTTP/1.1 on one connection until the peer hangs up or the
/// keep-alive session ends.
///
/// # Arguments
///
/// * `stream` - The established transport, already past any handshake
/// * `dispatcher` - The handler chain every request is run through
/// * `port` - Local port the connection arrived on
/// * `peer` - Remote address of the connection
/// * `secure` - Whether the transport is TLS
pub(crate) async fn serve<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    port: u16,
    peer: SocketAddr,
    secure: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |request| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { Ok::<_, Infallible>(dispatcher.dispatch(request, port, peer, secure).await) }
    });

    if let Err(error) = http1::Builder::new()
        .keep_alive(true)
        .half_close(true)
        .serve_connection(io, service)
        .await
    {
        tracing::debug!(%peer, port, secure, %error, "connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HandlerError, ServerRequest, ServerResponse};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn echo_path_dispatcher() -> Arc<Dispatcher> {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.add(
            None,
            Arc::new(|request: ServerRequest, response: ServerResponse| async move {
                response.send(request.path());
                Ok::<(), HandlerError>(())
            }),
        );
        dispatcher
    }

    #[tokio::test]
    async fn test_keep_alive_serves_sequential_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = echo_path_dispatcher();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            serve(stream, dispatcher, addr.port(), peer, false).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"GET /first HTTP/1.1\r\nHost: localhost\r\n\r\n\
                  GET /second HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();

        let reply = String::from_utf8_lossy(&reply);
        assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(reply.contains("/first"));
        assert!(reply.contains("/second"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_does_not_panic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = echo_path_dispatcher();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            serve(stream, dispatcher, addr.port(), peer, false).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"not an http request\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await;

        // hyper reports the parse error; serve logs it and returns.
        server.await.unwrap();
    }
}
