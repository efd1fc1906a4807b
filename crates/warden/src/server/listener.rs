//! TLS accept loop

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Serves connections once the TLS handshake has completed
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, stream: TlsStream<TcpStream>, peer: SocketAddr);
}

/// A bound TCP listener terminating TLS with a fixed configuration
///
/// Each accepted connection is handshaken and handed to the handler on its
/// own task. Closing the listener stops accepting and releases the port;
/// connections already handed off keep running.
pub struct TlsListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TlsListener {
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<rustls::ServerConfig>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            TlsAcceptor::from(tls),
            handler,
            cancel.clone(),
        ));

        info!(address = %local_addr, "TLS listener accepting connections");

        Ok(Self {
            local_addr,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait until the socket is released
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!(address = %self.local_addr, error = %e, "TLS accept loop ended abnormally");
        }
        debug!(address = %self.local_addr, "TLS listener closed");
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TlsListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<dyn ConnectionHandler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        trace!(peer = %peer, "Accepted connection");
                        let acceptor = acceptor.clone();
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls) => handler.handle(tls, peer).await,
                                Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
}
