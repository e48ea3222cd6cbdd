//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring, binding, or running a server.
#[derive(Debug, Error)]
pub enum Error {
    /// A port is already held by another socket. Recoverable when the
    /// server is allowed to substitute a nearby free port.
    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    /// Binding a port failed for a reason other than the port being taken
    /// (permissions, unroutable host, exhausted descriptors).
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A request pattern could not be parsed under strict parsing.
    #[error("invalid request pattern: {0}")]
    Pattern(String),

    /// Certificate or key material was rejected by the TLS stack.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// Self-signed certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    /// Supplied PEM text could not be decoded into certificates or a key.
    #[error("invalid PEM material: {0}")]
    Pem(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
