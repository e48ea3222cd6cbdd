//! Port availability probing
//!
//! Answers "can this port be bound right now?" by binding it and
//! immediately letting it go. Used to find substitutes for ports that
//! turn out to be taken.

use tokio::net::TcpListener;

use crate::error::{Error, Result};

/// Check whether a port can be bound on all interfaces.
///
/// The transient socket is released before returning, so the answer is
/// a snapshot: another process may still win the port afterwards.
pub async fn probe(port: u16) -> Result<u16> {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            drop(listener);
            Ok(port)
        }
        Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => {
            Err(Error::PortInUse { port })
        }
        Err(source) => Err(Error::Bind { port, source }),
    }
}

/// Scan upward from `start` for the first port that can be bound.
///
/// Only "already in use" moves the scan along; any other bind failure
/// is returned as-is.
pub async fn first_available(start: u16) -> Result<u16> {
    let mut port = start;
    loop {
        match probe(port).await {
            Ok(free) => return Ok(free),
            Err(Error::PortInUse { .. }) if port < u16::MAX => port += 1,
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn reserved_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_probe_free_port() {
        let (listener, port) = reserved_port().await;
        drop(listener);
        assert_eq!(probe(port).await.unwrap(), port);
    }

    #[tokio::test]
    async fn test_probe_busy_port() {
        let (_listener, port) = reserved_port().await;
        assert!(matches!(
            probe(port).await,
            Err(Error::PortInUse { port: busy }) if busy == port
        ));
    }

    #[tokio::test]
    async fn test_first_available_skips_busy_port() {
        let (_listener, port) = reserved_port().await;
        let found = first_available(port).await.unwrap();
        assert!(found > port);
    }

    #[tokio::test]
    async fn test_first_available_returns_start_when_free() {
        let (listener, port) = reserved_port().await;
        drop(listener);
        assert_eq!(first_available(port).await.unwrap(), port);
    }
}
