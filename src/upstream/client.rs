//! Upstream Client
//!
//! One client per configured upstream: owns the live transport, the
//! connection state, the MCP initialize handshake, and the periodic SSE
//! readiness probe.

use crate::config::{OperationTimeouts, TransportConfig, UpstreamConfig};
use crate::protocol::{METHOD_INITIALIZE, METHOD_INITIALIZED, MCP_PROTOCOL_VERSION};
use crate::upstream::{ConnectionState, McpTransport, SseTransport, StdioTransport};
use crate::Result;
use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded connect retry: 3 attempts spaced by the reconnect delay
const CONNECT_ATTEMPTS: u32 = 3;

/// Cadence of the SSE readiness probe
const SSE_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Client for a single upstream MCP server
pub struct UpstreamClient {
    config: UpstreamConfig,
    state: Arc<ConnectionState>,
    transport: Arc<RwLock<Option<Arc<dyn McpTransport>>>>,
    /// Initialize result from the upstream, kept for diagnostics
    server_info: RwLock<Option<Value>>,
    /// Soft concurrency ceiling, when configured
    concurrency: Option<Arc<Semaphore>>,
    probe: Mutex<Option<JoinHandle<()>>>,
    reconnect_delay: Duration,
    init_timeout: Duration,
}

impl UpstreamClient {
    /// Create a client for a configured upstream. No connection is made
    /// until [`connect`](Self::connect).
    pub fn new(config: UpstreamConfig, timeouts: &OperationTimeouts) -> Self {
        let state = Arc::new(ConnectionState::new(config.name.clone()));
        let concurrency = config
            .max_concurrent_requests
            .map(|n| Arc::new(Semaphore::new(n)));

        Self {
            config,
            state,
            transport: Arc::new(RwLock::new(None)),
            server_info: RwLock::new(None),
            concurrency,
            probe: Mutex::new(None),
            reconnect_delay: timeouts.reconnect_delay_duration(),
            init_timeout: timeouts.reinitialize_duration(),
        }
    }

    /// Create a client around an already-open transport. Used by tests
    /// and by embedders that bring their own channel.
    pub fn with_transport(name: &str, transport: Arc<dyn McpTransport>) -> Self {
        let config = UpstreamConfig {
            name: name.to_string(),
            transport: TransportConfig::Stdio {
                command: String::new(),
                args: vec![],
                env: vec![],
            },
            priority: None,
            capabilities: vec![],
            max_concurrent_requests: None,
        };

        let state = Arc::new(ConnectionState::new(name));
        state.mark_connected();

        Self {
            config,
            state,
            transport: Arc::new(RwLock::new(Some(transport))),
            server_info: RwLock::new(None),
            concurrency: None,
            probe: Mutex::new(None),
            reconnect_delay: Duration::from_millis(2500),
            init_timeout: Duration::from_secs(30),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.last_error()
    }

    pub fn priority(&self) -> Option<u8> {
        self.config.priority
    }

    pub fn capabilities(&self) -> &[String] {
        &self.config.capabilities
    }

    pub async fn server_info(&self) -> Option<Value> {
        self.server_info.read().await.clone()
    }

    /// Connect with bounded retry, run the MCP initialize handshake,
    /// and start the readiness probe for SSE upstreams.
    pub async fn connect(&self) -> Result<()> {
        let mut last_err = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.try_connect().await {
                Ok(()) => {
                    if matches!(self.config.transport, TransportConfig::Sse { .. }) {
                        self.start_probe();
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Connect attempt {}/{} to upstream '{}' failed: {}",
                        attempt,
                        CONNECT_ATTEMPTS,
                        self.name(),
                        e
                    );
                    last_err = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("no connect attempt made"));
        self.state.mark_disconnected(err.to_string());
        Err(err).with_context(|| format!("Failed to connect to upstream '{}'", self.name()))
    }

    async fn try_connect(&self) -> Result<()> {
        // Replace any previous transport before opening a new one; at
        // most one live transport per upstream.
        if let Some(old) = self.transport.write().await.take() {
            old.close().await;
        }

        let transport = self.open_transport().await?;
        let info = self.handshake(transport.as_ref()).await?;

        *self.server_info.write().await = Some(info);
        *self.transport.write().await = Some(transport);
        self.state.mark_connected();
        Ok(())
    }

    async fn open_transport(&self) -> Result<Arc<dyn McpTransport>> {
        match &self.config.transport {
            TransportConfig::Stdio { command, args, env } => {
                let transport =
                    StdioTransport::spawn(command, args, env, Arc::clone(&self.state)).await?;
                Ok(Arc::new(transport))
            }
            TransportConfig::Sse { url } => {
                let transport = SseTransport::connect(url, Arc::clone(&self.state)).await?;
                Ok(Arc::new(transport))
            }
        }
    }

    async fn handshake(&self, transport: &dyn McpTransport) -> Result<Value> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcproxy",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let info = tokio::time::timeout(
            self.init_timeout,
            transport.request(METHOD_INITIALIZE, params),
        )
        .await
        .map_err(|_| anyhow!("timeout during initialize handshake with '{}'", self.name()))??;

        transport.notify(METHOD_INITIALIZED, json!({})).await?;

        debug!("Upstream '{}' completed initialize handshake", self.name());
        Ok(info)
    }

    /// Issue a request on the live transport. Errors bubble verbatim;
    /// classification is the caller's concern.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let _permit = match &self.concurrency {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .map_err(|_| anyhow!("Connection pool closed for '{}'", self.name()))?,
            ),
            None => None,
        };

        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Connection not established to upstream '{}'", self.name()))?;

        transport.request(method, params).await
    }

    /// Tear down and re-run the full connect + handshake cycle. Used by
    /// the management API's reinitialize operation.
    pub async fn reinitialize(&self) -> Result<()> {
        info!("Reinitializing upstream '{}'", self.name());
        self.cleanup().await;
        self.connect().await
    }

    /// Close the transport and cancel the readiness probe.
    pub async fn cleanup(&self) {
        if let Some(probe) = self.probe.lock().expect("probe lock poisoned").take() {
            probe.abort();
        }

        if let Some(transport) = self.transport.write().await.take() {
            transport.close().await;
        }
    }

    /// Periodically inspect the SSE transport; a closed stream demotes
    /// the connection the same way the transport callbacks would. The
    /// probe task is cancelled by [`cleanup`](Self::cleanup).
    fn start_probe(&self) {
        let state = Arc::clone(&self.state);
        let transport = Arc::clone(&self.transport);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SSE_PROBE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let current = transport.read().await.clone();
                if let Some(current) = current {
                    if current.is_closed() && state.is_connected() {
                        state.mark_disconnected("Connection closed: SSE readyState is CLOSED");
                    }
                }
            }
        });

        let mut probe = self.probe.lock().expect("probe lock poisoned");
        if let Some(old) = probe.replace(handle) {
            old.abort();
        }
    }
}
