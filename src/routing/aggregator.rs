//! Listing Aggregator
//!
//! Fans list-type requests out across every connected upstream,
//! tolerates per-upstream failure, merges the survivors, and rebuilds
//! the routing table for the listed entity kind.

use super::{EntityKind, RoutingTables};
use crate::config::OperationTimeouts;
use crate::health::HealthMonitor;
use crate::protocol::{
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCE_TEMPLATES_LIST, METHOD_TOOLS_LIST,
};
use crate::server::errors::{classify, ErrorClass};
use crate::upstream::{UpstreamClient, UpstreamRegistry};
use crate::Result;
use anyhow::anyhow;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fan-out/fan-in aggregator over the connected upstream fleet
pub struct Aggregator {
    registry: UpstreamRegistry,
    tables: Arc<RoutingTables>,
    health: Arc<HealthMonitor>,
    timeouts: OperationTimeouts,
}

impl Aggregator {
    pub fn new(
        registry: UpstreamRegistry,
        tables: Arc<RoutingTables>,
        health: Arc<HealthMonitor>,
        timeouts: OperationTimeouts,
    ) -> Self {
        Self {
            registry,
            tables,
            health,
            timeouts,
        }
    }

    /// Merged `tools/list` across connected upstreams.
    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<ListToolsResult> {
        let results = self
            .fan_out(METHOD_TOOLS_LIST, cursor, self.timeouts.tools_list_duration())
            .await;

        self.tables.clear(EntityKind::Tool).await;
        let mut tools = Vec::new();

        for (client, result) in results {
            let Ok(value) = result else { continue };
            let listing: ListToolsResult = match serde_json::from_value(value) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Upstream '{}' returned malformed tools listing: {}", client.name(), e);
                    continue;
                }
            };

            for mut tool in listing.tools {
                tool.description = tool
                    .description
                    .map(|description| namespace(client.name(), &description));
                self.tables
                    .insert(EntityKind::Tool, &tool.name, client.name())
                    .await;
                tools.push(tool);
            }
        }

        debug!("Aggregated {} tools", tools.len());
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    /// Merged `prompts/list` across connected upstreams.
    pub async fn list_prompts(&self, cursor: Option<&str>) -> Result<ListPromptsResult> {
        let results = self
            .fan_out(METHOD_PROMPTS_LIST, cursor, self.timeouts.prompts_list_duration())
            .await;

        self.tables.clear(EntityKind::Prompt).await;
        let mut prompts = Vec::new();

        for (client, result) in results {
            let Ok(value) = result else { continue };
            let listing: ListPromptsResult = match serde_json::from_value(value) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Upstream '{}' returned malformed prompts listing: {}", client.name(), e);
                    continue;
                }
            };

            for mut prompt in listing.prompts {
                prompt.description = prompt
                    .description
                    .map(|description| namespace(client.name(), &description));
                self.tables
                    .insert(EntityKind::Prompt, &prompt.name, client.name())
                    .await;
                prompts.push(prompt);
            }
        }

        Ok(ListPromptsResult {
            prompts,
            next_cursor: None,
        })
    }

    /// Merged `resources/list` across connected upstreams. Routing is
    /// keyed by URI; the display name carries the namespace prefix.
    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<ListResourcesResult> {
        let results = self
            .fan_out(METHOD_RESOURCES_LIST, cursor, self.timeouts.resources_list_duration())
            .await;

        self.tables.clear(EntityKind::Resource).await;
        let mut resources = Vec::new();

        for (client, result) in results {
            let Ok(value) = result else { continue };
            let listing: ListResourcesResult = match serde_json::from_value(value) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Upstream '{}' returned malformed resources listing: {}", client.name(), e);
                    continue;
                }
            };

            for mut resource in listing.resources {
                resource.name = namespace(client.name(), &resource.name);
                self.tables
                    .insert(EntityKind::Resource, &resource.uri, client.name())
                    .await;
                resources.push(resource);
            }
        }

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    /// Merged `resources/templates/list`. Templates are display-only
    /// and do not populate a routing table.
    pub async fn list_resource_templates(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListResourceTemplatesResult> {
        let results = self
            .fan_out(
                METHOD_RESOURCE_TEMPLATES_LIST,
                cursor,
                self.timeouts.resource_templates_list_duration(),
            )
            .await;

        let mut templates = Vec::new();

        for (client, result) in results {
            let Ok(value) = result else { continue };
            let listing: ListResourceTemplatesResult = match serde_json::from_value(value) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(
                        "Upstream '{}' returned malformed resource templates listing: {}",
                        client.name(),
                        e
                    );
                    continue;
                }
            };

            for mut template in listing.resource_templates {
                template.name = namespace(client.name(), &template.name);
                templates.push(template);
            }
        }

        Ok(ListResourceTemplatesResult {
            resource_templates: templates,
            next_cursor: None,
        })
    }

    /// Repopulate a single routing table by re-running its listing.
    /// Used by the lookup-miss path of targeted operations.
    pub async fn rebuild(&self, kind: EntityKind) -> Result<()> {
        match kind {
            EntityKind::Tool => {
                self.list_tools(None).await?;
            }
            EntityKind::Prompt => {
                self.list_prompts(None).await?;
            }
            EntityKind::Resource => {
                self.list_resources(None).await?;
            }
        }
        Ok(())
    }

    /// Dispatch `method` to every connected upstream with a hard
    /// per-upstream timeout and all-settled collection. The incoming
    /// pagination cursor is forwarded unchanged; a timed-out request
    /// resolves to failure here while the transport-level work is left
    /// to finish and be discarded.
    async fn fan_out(
        &self,
        method: &str,
        cursor: Option<&str>,
        per_upstream_timeout: Duration,
    ) -> Vec<(Arc<UpstreamClient>, Result<Value>)> {
        let clients: Vec<Arc<UpstreamClient>> = self
            .registry
            .read()
            .await
            .values()
            .filter(|client| client.is_connected())
            .cloned()
            .collect();

        if clients.is_empty() {
            debug!("No connected upstreams for '{}'", method);
            return Vec::new();
        }

        let params = match cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };

        let futures = clients.into_iter().map(|client| {
            let params = params.clone();
            let method = method.to_string();
            async move {
                let result = match tokio::time::timeout(
                    per_upstream_timeout,
                    client.request(&method, params),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!(
                        "timeout after {}ms waiting for '{}' from '{}'",
                        per_upstream_timeout.as_millis(),
                        method,
                        client.name()
                    )),
                };
                (client, result)
            }
        });

        let results = join_all(futures).await;

        for (client, result) in &results {
            if let Err(error) = result {
                let message = error.to_string();
                warn!(
                    "Listing '{}' failed on upstream '{}': {}",
                    method,
                    client.name(),
                    message
                );

                if classify(&message) == ErrorClass::Connection {
                    client.state().mark_disconnected(message);
                    let health = Arc::clone(&self.health);
                    let name = client.name().to_string();
                    tokio::spawn(async move {
                        health.trigger_check(&name).await;
                    });
                }
            }
        }

        results
    }
}

/// Prefix a human-readable field with the owning upstream's name.
/// Applied exactly once per aggregate pass; upstreams always return the
/// raw field, so the prefix never stacks.
fn namespace(upstream: &str, text: &str) -> String {
    format!("[{}] {}", upstream, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsStore;
    use crate::upstream::McpTransport;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct CannedTransport {
        reply: Value,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl McpTransport for CannedTransport {
        async fn request(&self, _method: &str, _params: Value) -> Result<Value> {
            match &self.fail_with {
                Some(message) => Err(anyhow!("{}", message)),
                None => Ok(self.reply.clone()),
            }
        }

        async fn notify(&self, _method: &str, _params: Value) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }

        async fn close(&self) {}
    }

    fn client(name: &str, reply: Value) -> Arc<UpstreamClient> {
        Arc::new(UpstreamClient::with_transport(
            name,
            Arc::new(CannedTransport {
                reply,
                fail_with: None,
            }),
        ))
    }

    fn failing_client(name: &str, message: &str) -> Arc<UpstreamClient> {
        Arc::new(UpstreamClient::with_transport(
            name,
            Arc::new(CannedTransport {
                reply: Value::Null,
                fail_with: Some(message.to_string()),
            }),
        ))
    }

    fn aggregator(clients: Vec<Arc<UpstreamClient>>) -> (Aggregator, Arc<RoutingTables>) {
        let map: HashMap<String, Arc<UpstreamClient>> = clients
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        let registry: UpstreamRegistry = Arc::new(RwLock::new(map));
        let tables = Arc::new(RoutingTables::new());
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            metrics,
            Duration::from_secs(30),
        ));
        let agg = Aggregator::new(
            registry,
            Arc::clone(&tables),
            health,
            OperationTimeouts::default(),
        );
        (agg, tables)
    }

    fn tools_reply(tools: &[(&str, &str)]) -> Value {
        json!({
            "tools": tools
                .iter()
                .map(|(name, description)| json!({"name": name, "description": description}))
                .collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_merge_and_namespace() {
        let a = client("a", tools_reply(&[("t1", "does X"), ("t2", "does Y")]));
        let c = client("c", tools_reply(&[("t3", "does Z")]));
        let (agg, tables) = aggregator(vec![a, c]);

        let result = agg.list_tools(None).await.unwrap();
        assert_eq!(result.tools.len(), 3);

        let t1 = result.tools.iter().find(|t| t.name == "t1").unwrap();
        assert_eq!(t1.description.as_deref(), Some("[a] does X"));

        assert_eq!(tables.lookup(EntityKind::Tool, "t1").await.as_deref(), Some("a"));
        assert_eq!(tables.lookup(EntityKind::Tool, "t3").await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_namespacing_is_idempotent_across_calls() {
        let a = client("a", tools_reply(&[("t1", "does X")]));
        let (agg, _tables) = aggregator(vec![a]);

        let first = agg.list_tools(None).await.unwrap();
        let second = agg.list_tools(None).await.unwrap();

        assert_eq!(first.tools[0].description.as_deref(), Some("[a] does X"));
        assert_eq!(second.tools[0].description.as_deref(), Some("[a] does X"));
    }

    #[tokio::test]
    async fn test_failed_upstream_contributes_nothing() {
        let a = client("a", tools_reply(&[("t1", "x")]));
        let b = failing_client("b", "Connection reset by peer");
        let (agg, tables) = aggregator(vec![a, b]);

        let result = agg.list_tools(None).await.unwrap();
        assert_eq!(result.tools.len(), 1);

        // The table holds exactly the union of the successful upstreams
        let snapshot = tables.snapshot(EntityKind::Tool).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("t1").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_connection_class_listing_failure_demotes() {
        let b = failing_client("b", "Connection reset by peer");
        let handle = Arc::clone(&b);
        let (agg, _tables) = aggregator(vec![b]);

        let _ = agg.list_tools(None).await.unwrap();
        assert!(!handle.is_connected());
        assert!(handle.last_error().unwrap().contains("Connection reset"));
    }

    #[tokio::test]
    async fn test_business_listing_failure_does_not_demote() {
        let b = failing_client("b", "Invalid parameters");
        let handle = Arc::clone(&b);
        let (agg, _tables) = aggregator(vec![b]);

        let _ = agg.list_tools(None).await.unwrap();
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn test_no_connected_upstreams_yields_empty_listing() {
        let a = client("a", tools_reply(&[("t1", "x")]));
        a.state().mark_disconnected("Connection lost");
        let (agg, _tables) = aggregator(vec![a]);

        let result = agg.list_tools(None).await.unwrap();
        assert!(result.tools.is_empty());
    }

    #[tokio::test]
    async fn test_resources_namespace_display_name_not_uri() {
        let a = client(
            "a",
            json!({"resources": [{"uri": "file:///tmp/x", "name": "x"}]}),
        );
        let (agg, tables) = aggregator(vec![a]);

        let result = agg.list_resources(None).await.unwrap();
        assert_eq!(result.resources[0].name, "[a] x");
        assert_eq!(result.resources[0].uri, "file:///tmp/x");
        assert_eq!(
            tables
                .lookup(EntityKind::Resource, "file:///tmp/x")
                .await
                .as_deref(),
            Some("a")
        );
    }
}
