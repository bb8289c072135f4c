//! Management API Types

use crate::health::HealthCheck;
use crate::metrics::{MetricsRecord, QualityScore};
use serde::Serialize;
use std::time::SystemTime;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: SystemTime::now(),
        }
    }
}

/// One row of `GET /api/servers/status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusRow {
    pub name: String,
    pub transport: &'static str,
    pub connected: bool,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub priority: Option<u8>,
    pub capabilities: Vec<String>,
    pub total_requests: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub response_time_ms: f64,
    pub load_factor: f64,
    pub quality: f64,
    pub consecutive_failures: u32,
}

/// Serializable projection of a metrics record
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub response_time_ms: f64,
    pub total_requests: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub seconds_since_used: f64,
    pub is_healthy: bool,
    pub load_factor: f64,
    pub capability_score: f64,
}

impl From<&MetricsRecord> for MetricsView {
    fn from(record: &MetricsRecord) -> Self {
        Self {
            response_time_ms: record.response_time_ms,
            total_requests: record.total_requests,
            error_count: record.error_count,
            success_rate: record.success_rate,
            seconds_since_used: record.last_used.elapsed().as_secs_f64(),
            is_healthy: record.is_healthy,
            load_factor: record.load_factor,
            capability_score: record.capability_score,
        }
    }
}

/// Serializable projection of a health check
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckView {
    pub server_name: String,
    pub is_healthy: bool,
    pub seconds_since_check: f64,
    pub error_message: Option<String>,
    pub response_time_ms: Option<f64>,
}

impl From<&HealthCheck> for HealthCheckView {
    fn from(check: &HealthCheck) -> Self {
        Self {
            server_name: check.server_name.clone(),
            is_healthy: check.is_healthy,
            seconds_since_check: check.last_check.elapsed().as_secs_f64(),
            error_message: check.error_message.clone(),
            response_time_ms: check.response_time_ms,
        }
    }
}

/// `GET /api/health` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub avg_response_time_ms: f64,
    pub checks: Vec<HealthCheckView>,
}

/// `GET /api/metrics` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub records: std::collections::HashMap<String, MetricsView>,
    pub scores: std::collections::HashMap<String, QualityScore>,
    pub avg_response_time_ms: f64,
}

/// `GET /api/selection/strategies` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategiesReport {
    pub strategies: Vec<&'static str>,
    pub default: &'static str,
    pub fallback: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<crate::selection::SelectionResult>,
}

/// `GET /api/tools/status` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsStatusReport {
    pub count: usize,
    pub routes: std::collections::HashMap<String, String>,
}

/// `GET /api/servers/:name/details` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetails {
    pub name: String,
    pub config: crate::config::UpstreamConfig,
    pub connected: bool,
    pub last_error: Option<String>,
    pub metrics: Option<MetricsView>,
    pub quality: Option<QualityScore>,
    pub last_health_check: Option<HealthCheckView>,
    pub consecutive_failures: u32,
    pub server_info: Option<serde_json::Value>,
}
