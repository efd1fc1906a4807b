//! Listener and TLS material configuration
//!
//! The listener settings are kept apart from the certificate locations so that
//! ACME-driven setups can supply the paths after issuance.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

// ============================================================================
// Listener Configuration
// ============================================================================

/// Where and how the TLS listener binds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ListenerConfig {
    /// Address to bind to
    #[serde(default = "default_bind_address")]
    #[validate(custom(function = "crate::validation::validate_ip_addr"))]
    pub bind_address: String,

    /// Port to bind to (0 lets the OS choose)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Reload the certificate when its files change
    #[serde(default)]
    pub watch: bool,

    /// Quiet period collapsing bursts of file change notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl ListenerConfig {
    /// Debounce window as a `Duration`
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// `address:port` string suitable for binding
    pub fn socket_address(&self) -> String {
        if self.bind_address.contains(':') {
            format!("[{}]:{}", self.bind_address, self.port)
        } else {
            format!("{}:{}", self.bind_address, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            watch: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

// ============================================================================
// TLS Material
// ============================================================================

/// Locations of the certificate, private key and optional CA bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// PEM certificate (leaf first, optionally followed by the chain)
    pub cert_path: PathBuf,

    /// PEM private key
    pub key_path: PathBuf,

    /// PEM CA bundle
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
}

impl TlsFiles {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: None,
        }
    }

    pub fn with_ca(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }
}

/// A TLS listener together with the material it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[serde(default)]
    #[validate(nested)]
    pub listener: ListenerConfig,

    pub tls: TlsFiles,
}

impl ServerConfig {
    pub fn new(listener: ListenerConfig, tls: TlsFiles) -> Self {
        Self { listener, tls }
    }
}

// ============================================================================
// Default Value Functions
// ============================================================================

pub(crate) fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    443
}

pub(crate) fn default_debounce_ms() -> u64 {
    500
}
