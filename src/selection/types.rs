//! Selection Types

use crate::metrics::{MetricsRecord, QualityScore};
use serde::Serialize;
use serde_json::Value;

/// Request attributes the adaptive strategy inspects
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub method: Option<String>,
    pub timeout_ms: Option<u64>,
    pub priority: Option<String>,
}

impl SelectionRequest {
    /// Pull the selection-relevant fields out of request params.
    pub fn from_params(method: &str, params: &Value) -> Self {
        Self {
            method: Some(method.to_string()),
            timeout_ms: params.get("timeout").and_then(Value::as_u64),
            priority: params
                .get("priority")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// One healthy upstream with its metrics snapshot
#[derive(Debug, Clone)]
pub struct ServerCandidate {
    pub name: String,
    pub record: MetricsRecord,
    pub score: QualityScore,
}

/// Outcome of a selection pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub selected_server: String,
    /// 1 - rank / |healthy|, by overall-score order
    pub confidence: f64,
    pub reason: String,
    /// Up to three runners-up in overall-score order
    pub alternatives: Vec<String>,
    pub estimated_response_time_ms: f64,
    pub strategy_name: String,
}
