//! Proxy Server
//!
//! Owns the upstream fleet, the routing tables, and the policy
//! components, and exposes the downstream MCP request handlers.

use super::errors::is_not_found;
use super::retry::RetryExecutor;
use crate::config::Config;
use crate::health::HealthMonitor;
use crate::metrics::MetricsStore;
use crate::protocol::{
    downstream_capabilities, MCP_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_PING,
    METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_RESOURCE_TEMPLATES_LIST, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::routing::{Aggregator, EntityKind, RoutingTables};
use crate::selection::{SelectionRequest, SelectorEngine};
use crate::upstream::{UpstreamClient, UpstreamRegistry};
use crate::Result;
use anyhow::{anyhow, bail};
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Tool calls get a tighter retry budget than the other targeted
/// operations
const TOOL_CALL_MAX_RETRIES: u32 = 1;

/// The aggregating proxy: one downstream endpoint over N upstreams
pub struct ProxyServer {
    config: Arc<Config>,
    registry: UpstreamRegistry,
    tables: Arc<RoutingTables>,
    metrics: Arc<MetricsStore>,
    health: Arc<HealthMonitor>,
    aggregator: Arc<Aggregator>,
    selector: Arc<SelectorEngine>,
    retry: Arc<RetryExecutor>,
}

impl ProxyServer {
    /// Build the proxy and its upstream clients from configuration.
    pub fn new(config: Config) -> Self {
        let timeouts = config.selection_strategy.timeouts.clone();
        let clients: Vec<Arc<UpstreamClient>> = config
            .servers
            .iter()
            .cloned()
            .map(|server| Arc::new(UpstreamClient::new(server, &timeouts)))
            .collect();

        Self::with_clients(config, clients)
    }

    /// Build the proxy around pre-constructed upstream clients. Tests
    /// use this to inject mock transports.
    pub fn with_clients(config: Config, clients: Vec<Arc<UpstreamClient>>) -> Self {
        let config = Arc::new(config);

        let map: HashMap<String, Arc<UpstreamClient>> = clients
            .into_iter()
            .map(|client| (client.name().to_string(), client))
            .collect();
        let registry: UpstreamRegistry = Arc::new(RwLock::new(map));

        let metrics = Arc::new(MetricsStore::new(config.monitoring.retention_duration()));
        let tables = Arc::new(RoutingTables::new());
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.selection_strategy.health_check_interval_duration(),
        ));
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&registry),
            Arc::clone(&tables),
            Arc::clone(&health),
            config.selection_strategy.timeouts.clone(),
        ));
        let selector = Arc::new(SelectorEngine::new(
            Arc::clone(&metrics),
            config.selection_strategy.default,
            config.selection_strategy.fallback,
        ));
        let retry = Arc::new(RetryExecutor::new(
            Arc::clone(&metrics),
            Arc::clone(&health),
        ));

        Self {
            config,
            registry,
            tables,
            metrics,
            health,
            aggregator,
            selector,
            retry,
        }
    }

    /// Connect every upstream (tolerating individual failures) and
    /// start the background loops.
    pub async fn start(&self) -> Result<()> {
        {
            let clients: Vec<Arc<UpstreamClient>> =
                self.registry.read().await.values().cloned().collect();

            for client in &clients {
                self.metrics.initialize(client.name()).await;
            }

            let connects = clients.into_iter().map(|client| async move {
                if let Err(e) = client.connect().await {
                    warn!("Upstream '{}' failed to connect at startup: {:#}", client.name(), e);
                }
            });
            join_all(connects).await;
        }

        self.health.start();
        self.metrics.start_cleanup();

        let connected = self
            .registry
            .read()
            .await
            .values()
            .filter(|c| c.is_connected())
            .count();
        info!(
            "Proxy started with {}/{} upstreams connected",
            connected,
            self.registry.read().await.len()
        );
        Ok(())
    }

    /// Stop background loops and close every upstream.
    pub async fn shutdown(&self) {
        info!("Shutting down proxy");
        self.health.stop();
        self.metrics.stop_cleanup();

        let clients: Vec<Arc<UpstreamClient>> =
            self.registry.read().await.values().cloned().collect();
        for client in clients {
            client.cleanup().await;
        }
    }

    /// Dispatch one downstream MCP request.
    pub async fn handle_request(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            METHOD_INITIALIZE => Ok(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": downstream_capabilities(),
                "serverInfo": {
                    "name": "mcproxy",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
            METHOD_PING => Ok(json!({})),
            METHOD_TOOLS_LIST => {
                let result = self.aggregator.list_tools(cursor_of(&params)).await?;
                Ok(serde_json::to_value(result)?)
            }
            METHOD_PROMPTS_LIST => {
                let result = self.aggregator.list_prompts(cursor_of(&params)).await?;
                Ok(serde_json::to_value(result)?)
            }
            METHOD_RESOURCES_LIST => {
                let result = self.aggregator.list_resources(cursor_of(&params)).await?;
                Ok(serde_json::to_value(result)?)
            }
            METHOD_RESOURCE_TEMPLATES_LIST => {
                let result = self
                    .aggregator
                    .list_resource_templates(cursor_of(&params))
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            METHOD_TOOLS_CALL => self.call_tool(params).await,
            METHOD_PROMPTS_GET => self.get_prompt(params).await,
            METHOD_RESOURCES_READ => self.read_resource(params).await,
            other => bail!("Method not found: {}", other),
        }
    }

    /// `tools/call`: route by tool name, dispatch under the retry
    /// policy, evict the table entry when the upstream disowns the
    /// tool.
    async fn call_tool(&self, params: Value) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Invalid parameters: missing tool name"))?
            .to_string();

        let server = self.locate(EntityKind::Tool, &name).await?;
        let client = self.client(&server).await?;
        self.observe_selection(METHOD_TOOLS_CALL, &params).await;

        let timeout = self.config.selection_strategy.timeouts.tools_call_duration();
        let result = self
            .retry
            .execute(&server, TOOL_CALL_MAX_RETRIES, timeout, || {
                let client = Arc::clone(&client);
                let params = params.clone();
                async move { client.request(METHOD_TOOLS_CALL, params).await }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                if is_not_found(&error.to_string()) {
                    // The table was stale for this name; the upstream
                    // itself stays in rotation.
                    self.tables.remove(EntityKind::Tool, &name).await;
                }
                Err(error)
            }
        }
    }

    /// `prompts/get`: route by prompt name.
    async fn get_prompt(&self, params: Value) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Invalid parameters: missing prompt name"))?
            .to_string();

        let server = self.locate(EntityKind::Prompt, &name).await?;
        let client = self.client(&server).await?;
        self.observe_selection(METHOD_PROMPTS_GET, &params).await;

        let timeout = self.config.selection_strategy.timeouts.prompts_get_duration();
        let retries = self.config.selection_strategy.max_retries;
        let result = self
            .retry
            .execute(&server, retries, timeout, || {
                let client = Arc::clone(&client);
                let params = params.clone();
                async move { client.request(METHOD_PROMPTS_GET, params).await }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                if is_not_found(&error.to_string()) {
                    self.tables.remove(EntityKind::Prompt, &name).await;
                }
                Err(error)
            }
        }
    }

    /// `resources/read`: route by resource URI.
    async fn read_resource(&self, params: Value) -> Result<Value> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Invalid parameters: missing resource uri"))?
            .to_string();

        let server = self.locate(EntityKind::Resource, &uri).await?;
        let client = self.client(&server).await?;
        self.observe_selection(METHOD_RESOURCES_READ, &params).await;

        let timeout = self
            .config
            .selection_strategy
            .timeouts
            .resources_read_duration();
        let retries = self.config.selection_strategy.max_retries;
        let result = self
            .retry
            .execute(&server, retries, timeout, || {
                let client = Arc::clone(&client);
                let params = params.clone();
                async move { client.request(METHOD_RESOURCES_READ, params).await }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                if is_not_found(&error.to_string()) {
                    self.tables.remove(EntityKind::Resource, &uri).await;
                }
                Err(error)
            }
        }
    }

    /// Snapshot lookup with a one-shot rebuild on miss. A still-miss is
    /// a business-class routing error.
    async fn locate(&self, kind: EntityKind, name: &str) -> Result<String> {
        if let Some(server) = self.tables.lookup(kind, name).await {
            return Ok(server);
        }

        debug!(
            "Routing miss for {} '{}'; rebuilding table",
            kind.as_str(),
            name
        );
        self.aggregator.rebuild(kind).await?;

        self.tables.lookup(kind, name).await.ok_or_else(|| {
            anyhow!(
                "{} '{}' is not available on any connected server",
                capitalize(kind.as_str()),
                name
            )
        })
    }

    async fn client(&self, server: &str) -> Result<Arc<UpstreamClient>> {
        self.registry
            .read()
            .await
            .get(server)
            .cloned()
            .ok_or_else(|| anyhow!("Server '{}' is no longer registered", server))
    }

    /// Names pin the target upstream, so selection here is a policy
    /// and diagnostics layer; the result is logged, not enforced.
    async fn observe_selection(&self, method: &str, params: &Value) {
        let request = SelectionRequest::from_params(method, params);
        if let Some(result) = self.selector.select(None, &request).await {
            debug!(
                "Selector preference for {}: '{}' ({}, confidence {:.2})",
                method, result.selected_server, result.reason, result.confidence
            );
        }
    }

    /// Remove an upstream at runtime: close its transport and purge
    /// every trace of it from the shared state.
    pub async fn remove_upstream(&self, name: &str) -> Result<()> {
        let client = self
            .registry
            .write()
            .await
            .remove(name)
            .ok_or_else(|| anyhow!("Server '{}' is not registered", name))?;

        client.cleanup().await;
        self.tables.remove_server(name).await;
        self.metrics.remove(name).await;
        self.health.remove(name).await;
        self.retry.remove(name).await;

        info!("Upstream '{}' removed", name);
        Ok(())
    }

    /// Re-run the connect + initialize handshake for one upstream and
    /// rebuild the tools table.
    pub async fn reinitialize_upstream(&self, name: &str) -> Result<()> {
        let client = self.client(name).await?;
        client.reinitialize().await?;
        self.aggregator.rebuild(EntityKind::Tool).await?;
        Ok(())
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    pub fn tables(&self) -> &Arc<RoutingTables> {
        &self.tables
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn selector(&self) -> &Arc<SelectorEngine> {
        &self.selector
    }

    pub fn retry(&self) -> &Arc<RetryExecutor> {
        &self.retry
    }
}

fn cursor_of(params: &Value) -> Option<&str> {
    params.get("cursor").and_then(Value::as_str)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
