//! Server binding with ACME-issued certificates
//!
//! [`bind_with_acme`] obtains a certificate, points the server configuration
//! at the freshly written files, starts the server through the adapter
//! registered for the requested framework tag and, when enabled, starts the
//! renewal schedule. The server and the orchestrator are returned together
//! so callers keep manual control over both.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use certwarden_config::{AcmeConfig, ListenerConfig, ServerConfig, TlsFiles};
use tracing::{error, info};

use super::hot_reload::{HotReloadServer, ReloadObserver};
use super::listener::ConnectionHandler;
use super::ServerError;
use crate::acme::{AcmeClient, CertificatePaths, RenewalObserver};
use crate::error::CertError;
use crate::inspect::CertificateMetadata;

/// Framework tag of the built-in adapter
pub const DEFAULT_FRAMEWORK: &str = "tokio-rustls";

/// A running server the binding helper can control
#[async_trait]
pub trait ManagedServer: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    /// Re-read the certificate files and serve them
    async fn reload(&self) -> Result<(), ServerError>;

    async fn shutdown(&self);
}

#[async_trait]
impl ManagedServer for HotReloadServer {
    fn local_addr(&self) -> SocketAddr {
        HotReloadServer::local_addr(self)
    }

    async fn reload(&self) -> Result<(), ServerError> {
        HotReloadServer::reload(self).await
    }

    async fn shutdown(&self) {
        HotReloadServer::shutdown(self).await
    }
}

/// Starts a server for one framework
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    /// Tag the adapter is registered under
    fn framework(&self) -> &str;

    async fn serve(
        &self,
        config: ServerConfig,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Arc<dyn ManagedServer>, ServerError>;
}

/// Adapter serving through [`HotReloadServer`]
#[derive(Clone)]
pub struct TokioRustlsAdapter {
    observer: Arc<dyn ReloadObserver>,
}

impl TokioRustlsAdapter {
    pub fn new() -> Self {
        Self {
            observer: Arc::new(()),
        }
    }

    pub fn with_observer(observer: Arc<dyn ReloadObserver>) -> Self {
        Self { observer }
    }
}

impl Default for TokioRustlsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerAdapter for TokioRustlsAdapter {
    fn framework(&self) -> &str {
        DEFAULT_FRAMEWORK
    }

    async fn serve(
        &self,
        config: ServerConfig,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Arc<dyn ManagedServer>, ServerError> {
        let server = HotReloadServer::start(config, handler, Arc::clone(&self.observer)).await?;
        Ok(Arc::new(server))
    }
}

/// Framework tag to adapter mapping; tags are case-insensitive
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ServerAdapter>>,
}

impl AdapterRegistry {
    /// A registry with no adapters
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ServerAdapter>) {
        let tag = adapter.framework().to_ascii_lowercase();
        info!(framework = %tag, "Registered server adapter");
        self.adapters.insert(tag, adapter);
    }

    pub fn get(&self, framework: &str) -> Result<Arc<dyn ServerAdapter>, ServerError> {
        self.adapters
            .get(&framework.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ServerError::UnsupportedFramework(framework.to_string()))
    }

    /// Registered tags, sorted
    pub fn frameworks(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.adapters.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for AdapterRegistry {
    /// Registry providing the `tokio-rustls` adapter
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TokioRustlsAdapter::new()));
        registry
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("frameworks", &self.frameworks())
            .finish()
    }
}

/// A server together with the orchestrator that issued its certificate
pub struct AcmeServer {
    pub server: Arc<dyn ManagedServer>,
    pub client: Arc<AcmeClient>,
}

impl AcmeServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Renew now; the server picks up the result through its reload path
    pub async fn renew_certificates(&self) -> Result<CertificatePaths, ServerError> {
        Ok(self.client.renew_certificates().await?)
    }

    pub fn certificate_info(&self) -> Result<CertificateMetadata, CertError> {
        self.client.certificate_info()
    }

    /// Stop the renewal schedule and the server
    pub async fn shutdown(&self) {
        self.client.stop_auto_renewal();
        self.server.shutdown().await;
    }
}

impl std::fmt::Debug for AcmeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeServer")
            .field("address", &self.server.local_addr())
            .field("client", &self.client)
            .finish()
    }
}

/// Reloads a server after each renewal
struct ReloadOnRenewal {
    server: Weak<dyn ManagedServer>,
}

impl RenewalObserver for ReloadOnRenewal {
    fn on_renewed(&self, _paths: &CertificatePaths) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = server.reload().await {
                error!(error = %e, "Failed to reload server after certificate renewal");
            }
        });
    }
}

/// Obtain certificates for `acme` through Let's Encrypt and start a server
pub async fn bind_with_acme(
    acme: AcmeConfig,
    listener: ListenerConfig,
    handler: Arc<dyn ConnectionHandler>,
    framework: &str,
    registry: &AdapterRegistry,
) -> Result<AcmeServer, ServerError> {
    let client = Arc::new(AcmeClient::from_config(acme));
    bind_with_client(client, listener, handler, framework, registry).await
}

/// [`bind_with_acme`] with a caller-supplied orchestrator
///
/// The framework tag is resolved before anything is issued. When the
/// listener does not watch its files, a renewal triggers a reload directly.
pub async fn bind_with_client(
    client: Arc<AcmeClient>,
    listener: ListenerConfig,
    handler: Arc<dyn ConnectionHandler>,
    framework: &str,
    registry: &AdapterRegistry,
) -> Result<AcmeServer, ServerError> {
    let adapter = registry.get(framework)?;

    // `cert.pem` carries the full chain. `ca.pem` comes and goes with the
    // shape of each issued chain, so reloads must not depend on it.
    let paths = client.obtain_certificates().await?;
    let tls = TlsFiles {
        cert_path: paths.cert,
        key_path: paths.key,
        ca_path: None,
    };

    let watch = listener.watch;
    let server = adapter
        .serve(ServerConfig::new(listener, tls), handler)
        .await?;

    if !watch {
        client.add_observer(Arc::new(ReloadOnRenewal {
            server: Arc::downgrade(&server),
        }));
    }

    if client.config().auto_renew {
        client.start_auto_renewal();
    }

    info!(
        framework = %adapter.framework(),
        address = %server.local_addr(),
        domains = ?client.config().domains,
        "Server bound with ACME certificate"
    );

    Ok(AcmeServer { server, client })
}
