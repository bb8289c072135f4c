//! Management API Handlers

use super::types::*;
use crate::config::TransportConfig;
use crate::selection::SelectionRequest;
use crate::server::ProxyServer;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyServer>,
}

/// Optional preview parameters for the strategies endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StrategyPreviewQuery {
    pub strategy: Option<String>,
    pub timeout: Option<u64>,
    pub priority: Option<String>,
}

/// Fleet status: one row per configured upstream
pub async fn get_servers_status(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ServerStatusRow>>> {
    let proxy = &state.proxy;
    let registry = proxy.registry().read().await;
    let mut rows = Vec::with_capacity(registry.len());

    for (name, client) in registry.iter() {
        let record = proxy.metrics().get(name).await;
        let score = proxy.metrics().score(name).await;

        rows.push(ServerStatusRow {
            name: name.clone(),
            transport: match client.config().transport {
                TransportConfig::Stdio { .. } => "stdio",
                TransportConfig::Sse { .. } => "sse",
            },
            connected: client.is_connected(),
            healthy: record.as_ref().map(|r| r.is_healthy).unwrap_or(false),
            last_error: client.last_error(),
            priority: client.priority(),
            capabilities: client.capabilities().to_vec(),
            total_requests: record.as_ref().map(|r| r.total_requests).unwrap_or(0),
            error_count: record.as_ref().map(|r| r.error_count).unwrap_or(0),
            success_rate: record.as_ref().map(|r| r.success_rate).unwrap_or(1.0),
            response_time_ms: record.as_ref().map(|r| r.response_time_ms).unwrap_or(0.0),
            load_factor: record.as_ref().map(|r| r.load_factor).unwrap_or(0.0),
            quality: score.map(|s| s.overall).unwrap_or(0.0),
            consecutive_failures: proxy.retry().consecutive_failures(name).await,
        });
    }

    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Json(ApiResponse::success(rows))
}

/// Metrics records and quality scores for the whole fleet
pub async fn get_metrics(State(state): State<AppState>) -> Json<ApiResponse<MetricsReport>> {
    let proxy = &state.proxy;
    let records: HashMap<String, MetricsView> = proxy
        .metrics()
        .all()
        .await
        .iter()
        .map(|(name, record)| (name.clone(), MetricsView::from(record)))
        .collect();

    let report = MetricsReport {
        records,
        scores: proxy.metrics().all_scores().await,
        avg_response_time_ms: proxy.metrics().average_response_time_ms().await,
    };

    Json(ApiResponse::success(report))
}

/// Prometheus text exposition
pub async fn get_metrics_prometheus(
    State(state): State<AppState>,
) -> Result<String, StatusCode> {
    state
        .proxy
        .metrics()
        .export_prometheus()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Latest health checks with the fleet summary
pub async fn get_health(State(state): State<AppState>) -> Json<ApiResponse<HealthReport>> {
    let health = state.proxy.health();
    let summary = health.summary().await;
    let mut checks: Vec<HealthCheckView> = health
        .all_checks()
        .await
        .values()
        .map(HealthCheckView::from)
        .collect();
    checks.sort_by(|a, b| a.server_name.cmp(&b.server_name));

    Json(ApiResponse::success(HealthReport {
        total: summary.total,
        healthy: summary.healthy,
        unhealthy: summary.unhealthy,
        avg_response_time_ms: summary.avg_response_time_ms,
        checks,
    }))
}

/// Registered selection strategies, with an optional live preview
pub async fn get_selection_strategies(
    State(state): State<AppState>,
    Query(query): Query<StrategyPreviewQuery>,
) -> Json<ApiResponse<StrategiesReport>> {
    let selector = state.proxy.selector();

    let preview = if query.strategy.is_some() || query.timeout.is_some() || query.priority.is_some()
    {
        let request = SelectionRequest {
            method: None,
            timeout_ms: query.timeout,
            priority: query.priority.clone(),
        };
        selector.select(query.strategy.as_deref(), &request).await
    } else {
        None
    };

    Json(ApiResponse::success(StrategiesReport {
        strategies: selector.strategy_names(),
        default: selector.default_strategy().as_str(),
        fallback: selector.fallback_strategy().as_str(),
        preview,
    }))
}

/// Tools routing table snapshot
pub async fn get_tools_status(
    State(state): State<AppState>,
) -> Json<ApiResponse<ToolsStatusReport>> {
    let routes = state
        .proxy
        .tables()
        .snapshot(crate::routing::EntityKind::Tool)
        .await;

    Json(ApiResponse::success(ToolsStatusReport {
        count: routes.len(),
        routes,
    }))
}

/// Everything known about one upstream
pub async fn get_server_details(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServerDetails>>, StatusCode> {
    let proxy = &state.proxy;
    let client = proxy
        .registry()
        .read()
        .await
        .get(&name)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;

    let record = proxy.metrics().get(&name).await;
    let check = proxy.health().all_checks().await.remove(&name);

    let details = ServerDetails {
        name: name.clone(),
        config: client.config().clone(),
        connected: client.is_connected(),
        last_error: client.last_error(),
        metrics: record.as_ref().map(MetricsView::from),
        quality: proxy.metrics().score(&name).await,
        last_health_check: check.as_ref().map(HealthCheckView::from),
        consecutive_failures: proxy.retry().consecutive_failures(&name).await,
        server_info: client.server_info().await,
    };

    Ok(Json(ApiResponse::success(details)))
}

/// Manually run the health check for one upstream
pub async fn trigger_health_check(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<HealthCheckView>>, StatusCode> {
    let check = state
        .proxy
        .health()
        .trigger_check(&name)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    info!("Manual health check for '{}' via management API", name);
    Ok(Json(ApiResponse::success(HealthCheckView::from(&check))))
}

/// Re-run the connect + initialize handshake and rebuild the tools table
pub async fn reinitialize_tools(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<String>>, StatusCode> {
    if !state.proxy.registry().read().await.contains_key(&name) {
        return Err(StatusCode::NOT_FOUND);
    }

    match state.proxy.reinitialize_upstream(&name).await {
        Ok(()) => {
            info!("Reinitialized '{}' via management API", name);
            Ok(Json(ApiResponse::success(format!(
                "Server '{}' reinitialized",
                name
            ))))
        }
        Err(e) => Ok(Json(ApiResponse::error(format!(
            "Failed to reinitialize '{}': {}",
            name, e
        )))),
    }
}

/// Remove an upstream from the running proxy
pub async fn delete_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<String>>, StatusCode> {
    match state.proxy.remove_upstream(&name).await {
        Ok(()) => {
            info!("Removed '{}' via management API", name);
            Ok(Json(ApiResponse::success(format!(
                "Server '{}' removed",
                name
            ))))
        }
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}
