//! Management API Integration Tests

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use mcproxy::config::Config;
use mcproxy::management::ManagementServer;
use mcproxy::server::ProxyServer;
use mcproxy::upstream::{McpTransport, UpstreamClient};
use mcproxy::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct ListingTransport;

#[async_trait]
impl McpTransport for ListingTransport {
    async fn request(&self, method: &str, _params: Value) -> Result<Value> {
        match method {
            "tools/list" => Ok(json!({"tools": [{"name": "t1", "description": "scripted"}]})),
            _ => Ok(Value::Null),
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

fn proxy_with_one_upstream() -> Arc<ProxyServer> {
    let client = Arc::new(UpstreamClient::with_transport("a", Arc::new(ListingTransport)));
    Arc::new(ProxyServer::with_clients(Config::default(), vec![client]))
}

fn router(proxy: Arc<ProxyServer>) -> axum::Router {
    ManagementServer::new("127.0.0.1:0".parse().unwrap(), proxy).create_test_router()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_servers_status_lists_the_fleet() {
    let app = router(proxy_with_one_upstream());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/servers/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["name"], "a");
    assert_eq!(body["data"][0]["connected"], true);
}

#[tokio::test]
async fn test_health_endpoint_reflects_checks() {
    let proxy = proxy_with_one_upstream();
    proxy.health().run_checks().await;
    let app = router(proxy);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["healthy"], 1);
    assert_eq!(body["data"]["checks"][0]["serverName"], "a");
}

#[tokio::test]
async fn test_tools_status_reflects_routing_table() {
    let proxy = proxy_with_one_upstream();
    proxy
        .handle_request("tools/list", json!({}))
        .await
        .unwrap();
    let app = router(proxy);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/tools/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["routes"]["t1"], "a");
}

#[tokio::test]
async fn test_metrics_endpoint_carries_records_and_scores() {
    let proxy = proxy_with_one_upstream();
    proxy.metrics().record_request("a", 120.0, true).await;
    let app = router(proxy);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["data"]["records"]["a"]["totalRequests"], 1);
    assert!(body["data"]["scores"]["a"]["overall"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_prometheus_endpoint_serves_text() {
    let proxy = proxy_with_one_upstream();
    proxy.metrics().record_request("a", 50.0, true).await;
    let app = router(proxy);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/metrics/prometheus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("mcproxy_requests_total"));
}

#[tokio::test]
async fn test_selection_strategies_with_preview() {
    let proxy = proxy_with_one_upstream();
    proxy.metrics().initialize("a").await;
    let app = router(proxy);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/selection/strategies?strategy=performance")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    let strategies: Vec<&str> = body["data"]["strategies"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(strategies.contains(&"adaptive"));
    assert!(strategies.contains(&"round-robin"));
    assert_eq!(body["data"]["default"], "adaptive");
    assert_eq!(body["data"]["preview"]["selectedServer"], "a");
}

#[tokio::test]
async fn test_manual_health_check_and_delete() {
    let proxy = proxy_with_one_upstream();
    let app = router(Arc::clone(&proxy));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/servers/a/health-check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["isHealthy"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/servers/a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(proxy.registry().read().await.is_empty());

    // A second delete finds nothing
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/servers/a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_server_actions_are_404() {
    let app = router(proxy_with_one_upstream());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/servers/ghost/health-check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
