//! Tests for listing aggregation under partial upstream failure

use anyhow::anyhow;
use async_trait::async_trait;
use mcproxy::config::Config;
use mcproxy::protocol::ListToolsResult;
use mcproxy::routing::EntityKind;
use mcproxy::server::ProxyServer;
use mcproxy::upstream::{McpTransport, UpstreamClient};
use mcproxy::Result;
use serde_json::{json, Value};
use std::sync::Arc;

/// Transport with one canned reply per method; unknown methods hang
/// forever so the caller's timeout decides their fate.
struct ScriptedTransport {
    replies: Vec<(&'static str, Value)>,
    hang: bool,
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn request(&self, method: &str, _params: Value) -> Result<Value> {
        if self.hang {
            return std::future::pending().await;
        }
        for (scripted, reply) in &self.replies {
            if *scripted == method {
                return Ok(reply.clone());
            }
        }
        Err(anyhow!("Method {} not found", method))
    }

    async fn notify(&self, _method: &str, _params: Value) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&self) {}
}

fn upstream_with_tools(name: &str, tools: &[(&str, &str)]) -> Arc<UpstreamClient> {
    let reply = json!({
        "tools": tools
            .iter()
            .map(|(tool, description)| json!({"name": tool, "description": description}))
            .collect::<Vec<_>>()
    });

    Arc::new(UpstreamClient::with_transport(
        name,
        Arc::new(ScriptedTransport {
            replies: vec![("tools/list", reply)],
            hang: false,
        }),
    ))
}

fn hanging_upstream(name: &str) -> Arc<UpstreamClient> {
    Arc::new(UpstreamClient::with_transport(
        name,
        Arc::new(ScriptedTransport {
            replies: vec![],
            hang: true,
        }),
    ))
}

fn proxy_with(clients: Vec<Arc<UpstreamClient>>) -> ProxyServer {
    ProxyServer::with_clients(Config::default(), clients)
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_listing() {
    let a = upstream_with_tools("a", &[("t1", "first"), ("t2", "second")]);
    let b = hanging_upstream("b");
    let c = upstream_with_tools("c", &[("t3", "third")]);
    let b_handle = Arc::clone(&b);

    let proxy = proxy_with(vec![a, b, c]);

    let result: ListToolsResult =
        serde_json::from_value(proxy.handle_request("tools/list", json!({})).await.unwrap())
            .unwrap();

    // Three tools from the two upstreams that answered
    let mut names: Vec<&str> = result.tools.iter().map(|t| t.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["t1", "t2", "t3"]);

    // The routing table maps each tool to its owner, nothing from b
    let tables = proxy.tables();
    assert_eq!(tables.lookup(EntityKind::Tool, "t1").await.as_deref(), Some("a"));
    assert_eq!(tables.lookup(EntityKind::Tool, "t2").await.as_deref(), Some("a"));
    assert_eq!(tables.lookup(EntityKind::Tool, "t3").await.as_deref(), Some("c"));
    assert_eq!(tables.len(EntityKind::Tool).await, 3);

    // The timed-out upstream was demoted to disconnected
    assert!(!b_handle.is_connected());
    assert!(b_handle.last_error().unwrap().contains("timeout"));

    // A subsequent listing skips b entirely and still succeeds
    let again: ListToolsResult =
        serde_json::from_value(proxy.handle_request("tools/list", json!({})).await.unwrap())
            .unwrap();
    assert_eq!(again.tools.len(), 3);
}

#[tokio::test]
async fn test_namespacing_applied_exactly_once_per_listing() {
    let a = upstream_with_tools("a", &[("t1", "does X")]);
    let proxy = proxy_with(vec![a]);

    let first: ListToolsResult =
        serde_json::from_value(proxy.handle_request("tools/list", json!({})).await.unwrap())
            .unwrap();
    assert_eq!(first.tools[0].description.as_deref(), Some("[a] does X"));

    // The prefix must not stack on repeated listings
    let second: ListToolsResult =
        serde_json::from_value(proxy.handle_request("tools/list", json!({})).await.unwrap())
            .unwrap();
    assert_eq!(second.tools[0].description.as_deref(), Some("[a] does X"));
}

#[tokio::test]
async fn test_all_upstreams_unavailable_yields_empty_listing() {
    let a = upstream_with_tools("a", &[("t1", "x")]);
    a.state().mark_disconnected("Connection refused");
    let proxy = proxy_with(vec![a]);

    let result: ListToolsResult =
        serde_json::from_value(proxy.handle_request("tools/list", json!({})).await.unwrap())
            .unwrap();
    assert!(result.tools.is_empty());
}

#[tokio::test]
async fn test_prompts_and_resources_listings_route_independently() {
    let transport = ScriptedTransport {
        replies: vec![
            (
                "prompts/list",
                json!({"prompts": [{"name": "summarize", "description": "sums up"}]}),
            ),
            (
                "resources/list",
                json!({"resources": [{"uri": "file:///a.txt", "name": "a.txt"}]}),
            ),
        ],
        hang: false,
    };
    let client = Arc::new(UpstreamClient::with_transport("files", Arc::new(transport)));
    let proxy = proxy_with(vec![client]);

    let prompts = proxy.handle_request("prompts/list", json!({})).await.unwrap();
    assert_eq!(prompts["prompts"][0]["description"], "[files] sums up");

    let resources = proxy
        .handle_request("resources/list", json!({}))
        .await
        .unwrap();
    assert_eq!(resources["resources"][0]["name"], "[files] a.txt");
    assert_eq!(resources["resources"][0]["uri"], "file:///a.txt");

    let tables = proxy.tables();
    assert_eq!(
        tables
            .lookup(EntityKind::Prompt, "summarize")
            .await
            .as_deref(),
        Some("files")
    );
    assert_eq!(
        tables
            .lookup(EntityKind::Resource, "file:///a.txt")
            .await
            .as_deref(),
        Some("files")
    );
}
