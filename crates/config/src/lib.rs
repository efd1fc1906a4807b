//! Configuration for certwarden
//!
//! Typed, validated settings for the certificate lifecycle components:
//!
//! - [`monitor`]: expiration monitor thresholds and poll schedule
//! - [`acme`]: ACME issuance and renewal
//! - [`server`]: TLS listener and certificate locations
//! - [`validation`]: field and schema validators
//!
//! # Example
//!
//! ```toml
//! [monitor]
//! warning_threshold_days = 30
//! critical_threshold_days = 7
//!
//! [acme]
//! email = "admin@example.com"
//! domains = ["example.com", "www.example.com"]
//! cert_dir = "/var/lib/certwarden"
//! challenge_type = "http-01"
//!
//! [server.listener]
//! port = 8443
//! watch = true
//!
//! [server.tls]
//! cert_path = "/var/lib/certwarden/cert.pem"
//! key_path = "/var/lib/certwarden/key.pem"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod monitor;
pub mod server;
pub mod validation;

// ============================================================================
// Re-exports
// ============================================================================

pub use acme::{AcmeChallengeType, AcmeConfig};
pub use monitor::MonitorConfig;
pub use server::{ListenerConfig, ServerConfig, TlsFiles};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("Failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The file extension does not name a supported format
    #[error("Unsupported configuration format for {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),

    /// The configuration parsed but violates a constraint
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Expiration monitoring
    #[serde(default)]
    #[validate(nested)]
    pub monitor: Option<MonitorConfig>,

    /// ACME issuance and renewal
    #[serde(default)]
    #[validate(nested)]
    pub acme: Option<AcmeConfig>,

    /// TLS listener
    #[serde(default)]
    #[validate(nested)]
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration from a `.toml` or `.json` file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        config.validate()?;

        info!(
            path = %path.display(),
            monitor = config.monitor.is_some(),
            acme = config.acme.is_some(),
            server = config.server.is_some(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse TOML without validating
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
