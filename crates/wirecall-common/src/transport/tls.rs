//! TLS setup and peer verification.
//!
//! Both sides load PEM material from disk: a CA certificate used as the
//! trust anchor, plus their own private key and certificate chain. Servers
//! verify client certificates against the CA but accept unauthenticated
//! peers at the handshake layer; the data plane then refuses to decode
//! anything from an unverified peer and answers with an
//! `SSLPeerVerificationFailed` structured exception instead. Clients verify
//! the server chain and hostname inside the handshake itself, so a
//! verification failure is a fatal local error.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio_rustls::TlsConnector;

pub use tokio_rustls::TlsAcceptor;

use crate::protocol::error::{Result, WirecallError};

/// Paths to the PEM files enabling TLS on an endpoint: the CA certificate
/// the peer is verified against, and this side's own key and certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
}

impl TlsMaterial {
    pub fn new(ca: impl Into<PathBuf>, key: impl Into<PathBuf>, cert: impl Into<PathBuf>) -> Self {
        Self {
            ca: ca.into(),
            key: key.into(),
            cert: cert.into(),
        }
    }

    /// Checks that every configured file exists. A missing file is a fatal
    /// configuration error, caught at construction rather than on first
    /// connection.
    pub fn validate(&self) -> Result<()> {
        for (label, path) in [
            ("CA certificate", &self.ca),
            ("private key", &self.key),
            ("certificate", &self.cert),
        ] {
            if !path.exists() {
                return Err(WirecallError::Config(format!(
                    "could not find {label} at: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Client-side TLS state built once per client: the connector and the server
/// name the presented certificate must match.
#[derive(Clone)]
pub struct ClientTls {
    pub connector: TlsConnector,
    pub server_name: ServerName<'static>,
}

fn install_provider() {
    // Safe to call repeatedly; the first installation wins.
    rustls::crypto::ring::default_provider().install_default().ok();
}

/// Loads every certificate in a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|e| {
        WirecallError::Config(format!("could not open {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|cert| cert.ok())
        .collect();

    if certs.is_empty() {
        return Err(WirecallError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Loads the first private key in a PEM file (PKCS#1, PKCS#8 or SEC1).
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(|e| {
        WirecallError::Config(format!("could not open {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| WirecallError::Config(format!("invalid PEM in {}: {e}", path.display())))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            Some(_) => continue,
            None => break,
        }
    }

    Err(WirecallError::Config(format!(
        "no private key found in {}",
        path.display()
    )))
}

/// Builds the trust anchor store from the configured CA file.
fn root_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            WirecallError::Config(format!("invalid CA certificate in {}: {e}", path.display()))
        })?;
    }
    Ok(roots)
}

/// Builds the client-side connector: the CA as root store, this client's
/// key/cert presented for peer verification, and the target hostname the
/// server certificate must match.
pub fn client_tls(material: &TlsMaterial, host: &str) -> Result<ClientTls> {
    install_provider();
    material.validate()?;

    let roots = root_store(&material.ca)?;
    let certs = load_certs(&material.cert)?;
    let key = load_private_key(&material.key)?;

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| WirecallError::Config(format!("invalid client TLS material: {e}")))?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| WirecallError::Config(format!("invalid TLS hostname '{host}': {e}")))?;

    Ok(ClientTls {
        connector: TlsConnector::from(Arc::new(config)),
        server_name,
    })
}

/// Builds the server-side acceptor.
///
/// Client certificates are verified against the CA during the handshake, but
/// unauthenticated clients are allowed through so the connection layer can
/// answer their first frame with the structured exception the protocol
/// promises, rather than a bare handshake failure.
pub fn server_acceptor(material: &TlsMaterial) -> Result<TlsAcceptor> {
    install_provider();
    material.validate()?;

    let roots = root_store(&material.ca)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .allow_unauthenticated()
        .build()
        .map_err(|e| WirecallError::Config(format!("invalid client verifier: {e}")))?;

    let certs = load_certs(&material.cert)?;
    let key = load_private_key(&material.key)?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| WirecallError::Config(format!("invalid server TLS material: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Classifies a TLS handshake failure.
///
/// Certificate problems (untrusted chain, hostname mismatch, missing
/// certificate) are peer verification failures and fatal; everything else is
/// an ordinary connection error subject to the retry policy.
pub fn classify_handshake_error(err: io::Error, peer: &str) -> WirecallError {
    let certificate_related = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|rustls_err| {
            matches!(
                rustls_err,
                rustls::Error::InvalidCertificate(_)
                    | rustls::Error::NoCertificatesPresented
                    | rustls::Error::InvalidCertRevocationList(_)
            )
        });

    if certificate_related {
        WirecallError::SslPeerVerification(format!(
            "could not verify peer '{peer}': {err}"
        ))
    } else {
        WirecallError::Connection(format!("TLS handshake with {peer} failed: {err}"))
    }
}
