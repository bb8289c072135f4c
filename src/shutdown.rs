//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT, broadcasts a shutdown signal to the
//! long-running surfaces, and runs the proxy cleanup under a bounded
//! wait.

use crate::server::ProxyServer;
use crate::Result;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen on
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal to all subscribers
    pub fn signal(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("No subscribers received the shutdown signal");
        }
    }

    /// Block until SIGTERM, SIGINT, or Ctrl+C, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.signal();
        Ok(())
    }

    /// Run the proxy cleanup under the shutdown timeout
    pub async fn run_cleanup(&self, proxy: &ProxyServer) {
        info!("Running shutdown cleanup (timeout {:?})", self.timeout);

        if tokio::time::timeout(self.timeout, proxy.shutdown())
            .await
            .is_err()
        {
            warn!("Shutdown cleanup did not finish within {:?}", self.timeout);
        } else {
            info!("Shutdown cleanup complete");
        }
    }
}
