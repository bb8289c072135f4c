//! Health Types

use std::time::Instant;

/// Outcome of one liveness inspection, overwritten per check.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub server_name: String,
    pub is_healthy: bool,
    pub last_check: Instant,
    pub error_message: Option<String>,
    /// Duration of the inspection itself in milliseconds
    pub response_time_ms: Option<f64>,
}

/// Fleet-level health summary
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub avg_response_time_ms: f64,
}
