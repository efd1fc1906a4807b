//! Certificate inspection
//!
//! Decodes an X.509 certificate and derives its expiration metrics. Every call
//! re-reads the file and recomputes against the wall clock; nothing is cached.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;
use x509_parser::extensions::GeneralName;

use crate::error::{CertError, MaterialKind};
use crate::loader::resolve;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Facts about a certificate, relative to the time of inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateMetadata {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    /// Serial number as colon-separated hex
    pub serial_number: String,
    /// DNS names from the subject alternative name extension
    pub subject_alt_names: Vec<String>,
    /// Whole days until `not_after`, rounded down; negative once expired
    pub days_until_expiration: i64,
    /// `not_after` lies strictly before the inspection time
    pub is_expired: bool,
}

impl CertificateMetadata {
    /// Decode the first certificate in `pem` and measure it against `now`
    pub fn from_pem(pem: &str, now: DateTime<Utc>) -> Result<Self, CertError> {
        let block = pem::parse(pem.as_bytes()).map_err(|e| CertError::Parse {
            path: None,
            message: format!("invalid PEM: {}", e),
        })?;

        let (_, cert) = x509_parser::parse_x509_certificate(block.contents()).map_err(|e| {
            CertError::Parse {
                path: None,
                message: format!("invalid X.509 certificate: {}", e),
            }
        })?;

        let validity = cert.validity();
        let not_before = to_datetime(validity.not_before.timestamp())?;
        let not_after = to_datetime(validity.not_after.timestamp())?;

        let subject_alt_names = match cert.subject_alternative_name() {
            Ok(Some(ext)) => ext
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before,
            not_after,
            serial_number: cert.raw_serial_as_string(),
            subject_alt_names,
            days_until_expiration: days_until(not_after, now),
            is_expired: not_after < now,
        })
    }
}

/// Floor of the whole-day distance from `now` to `not_after`
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

/// Inspect the certificate at `path` against the current time
pub fn inspect(path: impl AsRef<Path>) -> Result<CertificateMetadata, CertError> {
    inspect_at(path, Utc::now())
}

/// Inspect the certificate at `path` against an explicit clock reading
pub fn inspect_at(
    path: impl AsRef<Path>,
    now: DateTime<Utc>,
) -> Result<CertificateMetadata, CertError> {
    let path = resolve(path.as_ref());

    if !path.exists() {
        return Err(CertError::NotFound {
            kind: MaterialKind::Certificate,
            path,
        });
    }

    let content = fs::read_to_string(&path).map_err(|source| CertError::Io {
        path: path.clone(),
        source,
    })?;

    let metadata = CertificateMetadata::from_pem(&content, now).map_err(|e| e.at(&path))?;

    trace!(
        cert_path = %path.display(),
        days_left = metadata.days_until_expiration,
        expired = metadata.is_expired,
        "Inspected certificate"
    );

    Ok(metadata)
}

/// True when the certificate is still valid but within `threshold_days` of expiry
pub fn is_certificate_expiring_soon(
    path: impl AsRef<Path>,
    threshold_days: u32,
) -> Result<bool, CertError> {
    let metadata = inspect(path)?;
    Ok(!metadata.is_expired && metadata.days_until_expiration <= i64::from(threshold_days))
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>, CertError> {
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| CertError::Parse {
        path: None,
        message: format!("validity timestamp {} out of range", timestamp),
    })
}

// ============================================================================
// Certificate Sources
// ============================================================================

/// Something that can be inspected repeatedly
///
/// The expiration monitor polls through this seam, so it can watch a file on
/// disk or any other provider of certificate metadata.
pub trait CertificateSource: Send + Sync {
    /// Inspect the current certificate
    fn inspect(&self) -> Result<CertificateMetadata, CertError>;

    /// Human-readable identity for logs
    fn describe(&self) -> String;
}

/// A certificate stored in a PEM file
#[derive(Debug, Clone)]
pub struct FileCertificate {
    path: PathBuf,
}

impl FileCertificate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CertificateSource for FileCertificate {
    fn inspect(&self) -> Result<CertificateMetadata, CertError> {
        inspect(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
