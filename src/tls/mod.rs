//! TLS material
//!
//! Every listener shares one acceptor, built either from supplied PEM
//! text or from a self-signed certificate generated at startup.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use rustls::ServerConfig;
use rustls_pki_types::CertificateDer;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

/// Subject and alternative names for a generated certificate.
#[derive(Debug, Clone)]
pub struct CertificateOptions {
    pub common_name: String,
    pub organization: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        Self {
            common_name: "localhost".to_string(),
            organization: "polyport".to_string(),
            dns_names: vec!["localhost".to_string()],
            ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        }
    }
}

/// A certificate and its private key, both PEM-encoded.
#[derive(Debug, Clone)]
pub struct CertificatePair {
    pub cert: String,
    pub key: String,
}

/// Generate a self-signed certificate.
pub fn generate_certificate(options: &CertificateOptions) -> Result<CertificatePair> {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, options.common_name.as_str());
    params
        .distinguished_name
        .push(DnType::OrganizationName, options.organization.as_str());

    let mut alt_names = Vec::new();
    for name in &options.dns_names {
        alt_names.push(SanType::DnsName(name.as_str().try_into()?));
    }
    for ip in &options.ip_addresses {
        alt_names.push(SanType::IpAddress(*ip));
    }
    params.subject_alt_names = alt_names;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(CertificatePair {
        cert: cert.pem(),
        key: key_pair.serialize_pem(),
    })
}

/// The certificate, key, and ready-to-use acceptor a server carries.
#[derive(Clone)]
pub struct TlsMaterial {
    cert_pem: String,
    key_pem: String,
    acceptor: TlsAcceptor,
}

impl TlsMaterial {
    /// Build from PEM-encoded certificate chain and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let mut cert_reader = cert_pem.as_bytes();
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<std::io::Result<Vec<CertificateDer<'static>>>>()
            .map_err(|e| Error::Pem(format!("unreadable certificate: {e}")))?;
        if certs.is_empty() {
            return Err(Error::Pem("no certificates found".to_string()));
        }

        let mut key_reader = key_pem.as_bytes();
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| Error::Pem(format!("unreadable private key: {e}")))?
            .ok_or_else(|| Error::Pem("no private key found".to_string()))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        // Connections are served over HTTP/1.1 only.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Build from a freshly generated self-signed certificate.
    pub fn generate() -> Result<Self> {
        let pair = generate_certificate(&CertificateOptions::default())?;
        Self::from_pem(&pair.cert, &pair.key)
    }

    /// The acceptor handed to listeners. Cloning is cheap.
    #[must_use]
    pub fn acceptor(&self) -> TlsAcceptor {
        self.acceptor.clone()
    }

    /// PEM text of the certificate in use.
    #[must_use]
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM text of the private key in use.
    #[must_use]
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}
