//! TLS listener with certificate hot reload
//!
//! A reload loads and validates the new bundle and builds its TLS
//! configuration first; only then is the current listener closed and a new
//! one bound to the same address. Reloads from the file watcher and from
//! [`HotReloadServer::reload`] are serialized, so at most one is in flight.
//! There is a short window between close and re-bind with nothing listening.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use certwarden_config::ServerConfig;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::listener::{ConnectionHandler, TlsListener};
use super::ServerError;
use crate::loader::{load_bundle, CertificateBundle};
use crate::tls::build_server_config;
use crate::watch::{ChangeListener, ChangeWatcher};

/// Receives reload outcomes
pub trait ReloadObserver: Send + Sync {
    /// The new listener is accepting connections with `bundle`
    fn on_reload(&self, _bundle: &CertificateBundle) {}

    /// A reload was attempted and failed
    fn on_reload_failed(&self, _error: &ServerError) {}
}

impl ReloadObserver for () {}

struct Inner {
    config: ServerConfig,
    address: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    observer: Arc<dyn ReloadObserver>,
    listener: tokio::sync::Mutex<Option<TlsListener>>,
    bundle: ArcSwap<CertificateBundle>,
    reloads: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    async fn reload(&self) -> Result<(), ServerError> {
        let mut slot = self.listener.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ServerError::Closed);
        }

        info!(
            cert_path = %self.config.tls.cert_path.display(),
            "Reloading TLS certificate"
        );

        let prepared = load_bundle(&self.config.tls)
            .map_err(ServerError::from)
            .and_then(|bundle| Ok((build_server_config(&bundle)?, bundle)));

        let (tls, bundle) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Certificate reload failed, keeping current listener");
                self.observer.on_reload_failed(&e);
                return Err(e);
            }
        };

        if let Some(current) = slot.take() {
            current.close().await;
        }

        match TlsListener::bind(self.address, tls, Arc::clone(&self.handler)).await {
            Ok(listener) => {
                *slot = Some(listener);
                self.bundle.store(Arc::new(bundle.clone()));
                let count = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
                info!(address = %self.address, reloads = count, "TLS certificate reloaded");
                self.observer.on_reload(&bundle);
                Ok(())
            }
            Err(source) => {
                let e = ServerError::Bind {
                    addr: self.address.to_string(),
                    source,
                };
                error!(error = %e, "Failed to re-bind listener after reload");
                self.observer.on_reload_failed(&e);
                Err(e)
            }
        }
    }
}

/// Reloads the server when watched files settle
struct ReloadOnChange {
    inner: Weak<Inner>,
}

#[async_trait]
impl ChangeListener for ReloadOnChange {
    async fn on_change(&self, paths: Vec<PathBuf>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        debug!(files = ?paths, "Certificate files changed, reloading");
        // Failures are already logged and reported to the observer.
        let _ = inner.reload().await;
    }
}

/// A TLS server whose certificate can be replaced while it runs
pub struct HotReloadServer {
    inner: Arc<Inner>,
    watcher: Mutex<Option<ChangeWatcher>>,
}

impl HotReloadServer {
    /// Load the bundle, bind the listener and, if enabled, start watching
    pub async fn start(
        config: ServerConfig,
        handler: Arc<dyn ConnectionHandler>,
        observer: Arc<dyn ReloadObserver>,
    ) -> Result<Self, ServerError> {
        let bundle = load_bundle(&config.tls)?;
        let tls = build_server_config(&bundle)?;

        let requested = config.listener.socket_address();
        let address: SocketAddr = requested.parse().map_err(|e| ServerError::Bind {
            addr: requested.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

        let listener = TlsListener::bind(address, tls, Arc::clone(&handler))
            .await
            .map_err(|source| ServerError::Bind {
                addr: requested.clone(),
                source,
            })?;

        // Pin the actual port so re-binds land on the same one when port 0 was asked for.
        let address = listener.local_addr();

        let inner = Arc::new(Inner {
            address,
            handler,
            observer,
            listener: tokio::sync::Mutex::new(Some(listener)),
            bundle: ArcSwap::from_pointee(bundle),
            reloads: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            config,
        });

        let watcher = if inner.config.listener.watch {
            let paths = vec![
                inner.config.tls.cert_path.clone(),
                inner.config.tls.key_path.clone(),
            ];
            let listener = Arc::new(ReloadOnChange {
                inner: Arc::downgrade(&inner),
            });
            Some(ChangeWatcher::watch(
                &paths,
                inner.config.listener.debounce(),
                listener,
            )?)
        } else {
            None
        };

        info!(
            address = %address,
            watch = watcher.is_some(),
            "TLS server started"
        );

        Ok(Self {
            inner,
            watcher: Mutex::new(watcher),
        })
    }

    /// Reload the certificate now
    ///
    /// On failure to load or build the new material the current listener
    /// keeps serving the previous certificate.
    pub async fn reload(&self) -> Result<(), ServerError> {
        self.inner.reload().await
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.address
    }

    /// Bundle currently being served
    pub fn current_bundle(&self) -> Arc<CertificateBundle> {
        self.inner.bundle.load_full()
    }

    /// Completed reloads since start
    pub fn reload_count(&self) -> u64 {
        self.inner.reloads.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Stop watching, close the listener and refuse further reloads
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }

        let mut slot = self.inner.listener.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        if let Some(listener) = slot.take() {
            listener.close().await;
        }

        info!(address = %self.inner.address, "TLS server stopped");
    }
}

impl std::fmt::Debug for HotReloadServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloadServer")
            .field("address", &self.inner.address)
            .field("watching", &self.watcher.lock().is_some())
            .field("reloads", &self.reload_count())
            .finish()
    }
}
