//! rustls server configuration from a certificate bundle

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tracing::trace;

use crate::loader::CertificateBundle;

/// Errors raised while turning PEM material into a TLS configuration
#[derive(Debug, Error)]
pub enum TlsError {
    /// The certificate PEM could not be decoded
    #[error("Failed to load certificate: {0}")]
    CertificateLoad(String),

    /// The private key PEM could not be decoded
    #[error("Failed to load private key: {0}")]
    KeyLoad(String),

    /// rustls rejected the certificate/key pair or configuration
    #[error("Failed to build TLS config: {0}")]
    ConfigBuild(String),
}

/// Certificate chain for the bundle: the certificate file's blocks, followed
/// by CA blocks not already present
pub fn certificate_chain(bundle: &CertificateBundle) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut chain = parse_certs(bundle.certificate_pem())?;
    if chain.is_empty() {
        return Err(TlsError::CertificateLoad(
            "No certificates found in certificate PEM".to_string(),
        ));
    }

    if let Some(ca_pem) = bundle.ca_pem() {
        for cert in parse_certs(ca_pem)? {
            if !chain.contains(&cert) {
                chain.push(cert);
            }
        }
    }

    Ok(chain)
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateLoad(e.to_string()))
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| TlsError::KeyLoad(e.to_string()))?
        .ok_or_else(|| TlsError::KeyLoad("No private key found in PEM".to_string()))
}

/// Build a server configuration serving `bundle`
pub fn build_server_config(bundle: &CertificateBundle) -> Result<Arc<ServerConfig>, TlsError> {
    let chain = certificate_chain(bundle)?;
    let key = parse_key(bundle.private_key_pem())?;

    trace!(chain_len = chain.len(), "Building TLS server configuration");

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::ConfigBuild(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| TlsError::ConfigBuild(format!("Certificate/key mismatch: {}", e)))?;

    Ok(Arc::new(config))
}
