//! Errors shared by the certificate loader and inspector

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which piece of TLS material an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Certificate,
    PrivateKey,
    CaBundle,
}

impl MaterialKind {
    fn title(&self) -> &'static str {
        match self {
            MaterialKind::Certificate => "Certificate",
            MaterialKind::PrivateKey => "Private key",
            MaterialKind::CaBundle => "CA bundle",
        }
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialKind::Certificate => f.write_str("certificate"),
            MaterialKind::PrivateKey => f.write_str("private key"),
            MaterialKind::CaBundle => f.write_str("CA bundle"),
        }
    }
}

/// Errors raised while loading or inspecting certificate material
#[derive(Debug, Error)]
pub enum CertError {
    /// A required file does not exist
    #[error("{} file not found at: {}", .kind.title(), .path.display())]
    NotFound { kind: MaterialKind, path: PathBuf },

    /// The content failed the structural check
    #[error("Invalid {kind} format{}", path_suffix(.path))]
    InvalidFormat {
        kind: MaterialKind,
        path: Option<PathBuf>,
    },

    /// The content could not be decoded as X.509
    #[error("Failed to parse certificate{}: {message}", path_suffix(.path))]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    /// The file exists but could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CertError {
    /// Attach a file location to a content-level error
    pub(crate) fn at(self, location: &Path) -> Self {
        match self {
            CertError::InvalidFormat { kind, path: None } => CertError::InvalidFormat {
                kind,
                path: Some(location.to_path_buf()),
            },
            CertError::Parse {
                path: None,
                message,
            } => CertError::Parse {
                path: Some(location.to_path_buf()),
                message,
            },
            other => other,
        }
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, CertError::NotFound { .. })
    }
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" ({})", path.display()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = CertError::NotFound {
            kind: MaterialKind::Certificate,
            path: PathBuf::from("/srv/tls/cert.pem"),
        };
        assert_eq!(
            err.to_string(),
            "Certificate file not found at: /srv/tls/cert.pem"
        );
    }

    #[test]
    fn test_invalid_format_message() {
        let err = CertError::InvalidFormat {
            kind: MaterialKind::Certificate,
            path: None,
        };
        assert_eq!(err.to_string(), "Invalid certificate format");

        let err = err.at(Path::new("/srv/tls/cert.pem"));
        assert_eq!(
            err.to_string(),
            "Invalid certificate format (/srv/tls/cert.pem)"
        );
    }
}
