//! Management API Server

use super::{api::ManagementApi, handlers::AppState};
use crate::server::ProxyServer;
use crate::Result;
use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Observability API server
pub struct ManagementServer {
    bind_addr: SocketAddr,
    app_state: AppState,
}

impl ManagementServer {
    /// Create a new management server over the proxy's shared state
    pub fn new(bind_addr: SocketAddr, proxy: Arc<ProxyServer>) -> Self {
        Self {
            bind_addr,
            app_state: AppState { proxy },
        }
    }

    /// Start the management API server
    pub async fn start(self) -> Result<()> {
        info!("Starting management API server on {}", self.bind_addr);

        let app = ManagementApi::create_router(self.app_state);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind management API to {}", self.bind_addr))?;

        info!("Management API listening on {}", self.bind_addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("Management API server error: {}", e);
            return Err(e.into());
        }

        Ok(())
    }

    /// Create a router for testing
    pub fn create_test_router(&self) -> Router {
        ManagementApi::create_router(self.app_state.clone())
    }
}
