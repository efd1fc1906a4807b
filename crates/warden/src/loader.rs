//! Certificate store loader
//!
//! Reads certificate, private key and optional CA material from disk and runs
//! a structural check on each piece. The check only looks for the PEM markers;
//! it catches obviously wrong files early and does not authenticate anything.

use std::fs;
use std::path::{Path, PathBuf};

use certwarden_config::TlsFiles;
use tracing::{debug, trace};

use crate::error::{CertError, MaterialKind};

/// Marker every PEM certificate block carries
const CERTIFICATE_MARKER: &str = "BEGIN CERTIFICATE";

/// Marker every PEM block carries (keys come in several labels)
const PEM_MARKER: &str = "BEGIN";

/// TLS material as read from disk
///
/// Immutable once constructed; a reload produces a new bundle rather than
/// mutating this one.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    certificate_pem: String,
    private_key_pem: String,
    ca_pem: Option<String>,
}

impl CertificateBundle {
    /// Build a bundle from in-memory PEM, applying the same checks as the loader
    pub fn from_pem(
        certificate_pem: impl Into<String>,
        private_key_pem: impl Into<String>,
        ca_pem: Option<String>,
    ) -> Result<Self, CertError> {
        let certificate_pem = certificate_pem.into();
        let private_key_pem = private_key_pem.into();

        validate_certificate(&certificate_pem)?;
        validate_key(&private_key_pem)?;

        Ok(Self {
            certificate_pem,
            private_key_pem,
            ca_pem,
        })
    }

    /// PEM certificate, leaf first
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// PEM private key
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// PEM CA bundle, if one was configured
    pub fn ca_pem(&self) -> Option<&str> {
        self.ca_pem.as_deref()
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate_len", &self.certificate_pem.len())
            .field("private_key", &"<redacted>")
            .field("has_ca", &self.ca_pem.is_some())
            .finish()
    }
}

/// Check that content looks like a PEM certificate
pub fn validate_certificate(content: &str) -> Result<(), CertError> {
    if content.contains(CERTIFICATE_MARKER) {
        Ok(())
    } else {
        Err(CertError::InvalidFormat {
            kind: MaterialKind::Certificate,
            path: None,
        })
    }
}

/// Check that content looks like a PEM private key
pub fn validate_key(content: &str) -> Result<(), CertError> {
    if content.contains(PEM_MARKER) {
        Ok(())
    } else {
        Err(CertError::InvalidFormat {
            kind: MaterialKind::PrivateKey,
            path: None,
        })
    }
}

/// Load and validate the certificate bundle named by `files`
///
/// Paths are resolved against the current directory. The certificate and key
/// must exist; a missing CA path yields a bundle without CA. The certificate
/// is validated before the key.
pub fn load_bundle(files: &TlsFiles) -> Result<CertificateBundle, CertError> {
    let cert_path = resolve(&files.cert_path);
    let key_path = resolve(&files.key_path);

    if !cert_path.exists() {
        return Err(CertError::NotFound {
            kind: MaterialKind::Certificate,
            path: cert_path,
        });
    }
    if !key_path.exists() {
        return Err(CertError::NotFound {
            kind: MaterialKind::PrivateKey,
            path: key_path,
        });
    }

    let certificate_pem = read_pem(&cert_path, MaterialKind::Certificate)?;
    let private_key_pem = read_pem(&key_path, MaterialKind::PrivateKey)?;
    let ca_pem = match &files.ca_path {
        Some(ca_path) => Some(read_pem(&resolve(ca_path), MaterialKind::CaBundle)?),
        None => None,
    };

    validate_certificate(&certificate_pem).map_err(|e| e.at(&cert_path))?;
    validate_key(&private_key_pem).map_err(|e| e.at(&key_path))?;

    debug!(
        cert_path = %cert_path.display(),
        key_path = %key_path.display(),
        has_ca = ca_pem.is_some(),
        "Loaded certificate bundle"
    );

    Ok(CertificateBundle {
        certificate_pem,
        private_key_pem,
        ca_pem,
    })
}

/// Absolute form of `path`, falling back to the path as given
pub(crate) fn resolve(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn read_pem(path: &Path, kind: MaterialKind) -> Result<String, CertError> {
    trace!(path = %path.display(), kind = %kind, "Reading PEM file");

    let bytes = fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CertError::NotFound {
                kind,
                path: path.to_path_buf(),
            }
        } else {
            CertError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    String::from_utf8(bytes).map_err(|_| CertError::InvalidFormat {
        kind,
        path: Some(path.to_path_buf()),
    })
}
