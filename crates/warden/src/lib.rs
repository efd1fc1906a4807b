//! Certwarden Library
//!
//! TLS certificate lifecycle management for long-running network services.
//!
//! - **Loading**: certificate, key and CA material with structural checks
//! - **Inspection**: X.509 validity metrics recomputed on every call
//! - **Monitoring**: expiration alerts with per-band hysteresis
//! - **Renewal**: ACME issuance, renewal and a background schedule
//! - **Hot Reload**: swap the served certificate when files change
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certwarden::{ExpiryMonitor, FileCertificate};
//! use certwarden_config::MonitorConfig;
//!
//! let source = Arc::new(FileCertificate::new("/etc/tls/cert.pem"));
//! let monitor = ExpiryMonitor::start(source, MonitorConfig::default(), Arc::new(()))?;
//! println!("{:?}", monitor.info()?);
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod error;
pub mod inspect;
pub mod loader;
pub mod monitor;
pub mod server;
pub mod tls;
pub mod watch;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Errors
pub use error::{CertError, MaterialKind};

// Loading and inspection
pub use inspect::{
    inspect, inspect_at, is_certificate_expiring_soon, CertificateMetadata, CertificateSource,
    FileCertificate,
};
pub use loader::{load_bundle, CertificateBundle};

// Expiration monitoring
pub use monitor::{
    ExpiryAlert, ExpiryMonitor, ExpiryObserver, ExpiryState, ExpiryTracker, MonitorError,
    MonitorHandle,
};

// Change notification
pub use watch::{ChangeListener, ChangeWatcher, WatchError};

// ACME
pub use acme::{AcmeClient, AcmeError, CertificatePaths, RenewalObserver, RenewalOutcome};

// Serving
pub use server::{
    bind_with_acme, AcmeServer, AdapterRegistry, ConnectionHandler, HotReloadServer,
    ReloadObserver, ServerError,
};
pub use tls::{build_server_config, TlsError};
