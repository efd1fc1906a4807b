//! Certificate storage for ACME
//!
//! # Directory Structure
//!
//! ```text
//! cert_dir/
//! ├── cert.pem              # Chain as issued (leaf first)
//! ├── key.pem               # Private key (0600)
//! ├── ca.pem                # Chain after the leaf, only when there is one
//! └── .well-known/
//!     └── acme-challenge/
//!         └── <token>       # HTTP-01 response, present during validation only
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use pem::{EncodeConfig, LineEnding};
use tracing::{debug, info, trace, warn};

use super::error::StorageError;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const CA_FILE: &str = "ca.pem";

/// Relative directory holding HTTP-01 responses
const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// Files written by a successful issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: Option<PathBuf>,
}

/// Filesystem layout for issued certificates and challenge artifacts
#[derive(Debug, Clone)]
pub struct CertificateStorage {
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Storage rooted at `base_path`; nothing is created until the first write
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn cert_path(&self) -> PathBuf {
        self.base_path.join(CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.base_path.join(KEY_FILE)
    }

    pub fn ca_path(&self) -> PathBuf {
        self.base_path.join(CA_FILE)
    }

    /// True once a certificate has been written
    pub fn has_certificate(&self) -> bool {
        self.cert_path().exists()
    }

    // =========================================================================
    // Certificate Operations
    // =========================================================================

    /// Persist an issued chain and its private key
    ///
    /// `cert.pem` receives the chain verbatim. `ca.pem` receives every block
    /// after the leaf and is only written when the chain has more than one
    /// certificate; a stale `ca.pem` from an earlier chain is removed.
    pub fn save_bundle(&self, chain_pem: &str, key_pem: &str) -> Result<CertificatePaths, StorageError> {
        let blocks: Vec<pem::Pem> = pem::parse_many(chain_pem)
            .map_err(|e| StorageError::Serialization(format!("invalid certificate chain: {}", e)))?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .collect();

        if blocks.is_empty() {
            return Err(StorageError::Serialization(
                "certificate chain contains no certificates".to_string(),
            ));
        }

        fs::create_dir_all(&self.base_path)?;

        let cert = self.cert_path();
        let key = self.key_path();

        fs::write(&cert, chain_pem)?;

        fs::write(&key, key_pem)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&key, fs::Permissions::from_mode(0o600))?;
        }

        let ca = if blocks.len() > 1 {
            let ca = self.ca_path();
            let config = EncodeConfig::new().set_line_ending(LineEnding::LF);
            fs::write(&ca, pem::encode_many_config(&blocks[1..], config))?;
            Some(ca)
        } else {
            let stale = self.ca_path();
            if stale.exists() {
                fs::remove_file(&stale)?;
                debug!(path = %stale.display(), "Removed stale CA bundle");
            }
            None
        };

        info!(
            cert_dir = %self.base_path.display(),
            chain_len = blocks.len(),
            has_ca = ca.is_some(),
            "Saved certificate to storage"
        );

        Ok(CertificatePaths { cert, key, ca })
    }

    // =========================================================================
    // Challenge Artifacts
    // =========================================================================

    /// Location of the HTTP-01 response for `token`
    pub fn challenge_path(&self, token: &str) -> PathBuf {
        self.base_path.join(CHALLENGE_DIR).join(token)
    }

    /// Write the HTTP-01 response for `token`
    pub fn write_challenge(&self, token: &str, key_authorization: &str) -> Result<PathBuf, StorageError> {
        let path = self.challenge_path(token);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, key_authorization)?;
        trace!(path = %path.display(), "Wrote HTTP-01 challenge response");
        Ok(path)
    }

    /// Remove the HTTP-01 response for `token`; missing files are ignored
    pub fn remove_challenge(&self, token: &str) {
        let path = self.challenge_path(token);
        match fs::remove_file(&path) {
            Ok(()) => trace!(path = %path.display(), "Removed HTTP-01 challenge response"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove challenge response"),
        }
    }
}
