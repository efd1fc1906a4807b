//! TLS serving with certificate hot reload and ACME binding
//!
//! - [`TlsListener`] - Accept loop terminating TLS for a [`ConnectionHandler`]
//! - [`HotReloadServer`] - Listener that re-binds with fresh material on change
//! - [`AdapterRegistry`] / [`bind_with_acme`] - Obtain certificates, then start
//!   a server through the adapter registered for a framework tag

use std::io;

use thiserror::Error;

use crate::acme::AcmeError;
use crate::error::CertError;
use crate::tls::TlsError;
use crate::watch::WatchError;

mod binding;
mod hot_reload;
mod listener;

pub use binding::{
    bind_with_acme, bind_with_client, AcmeServer, AdapterRegistry, ManagedServer, ServerAdapter,
    TokioRustlsAdapter, DEFAULT_FRAMEWORK,
};
pub use hot_reload::{HotReloadServer, ReloadObserver};
pub use listener::{ConnectionHandler, TlsListener};

/// Errors raised while starting, reloading or binding a server
#[derive(Debug, Error)]
pub enum ServerError {
    /// No adapter is registered for the requested framework tag
    #[error("Unsupported server framework: {0}")]
    UnsupportedFramework(String),

    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The server has been shut down
    #[error("Server is shut down")]
    Closed,

    #[error(transparent)]
    Certificate(#[from] CertError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}
