//! Metrics Types

use serde::Serialize;
use std::time::Instant;

/// Rolling statistics for one upstream.
///
/// Invariant: `error_count <= total_requests` and
/// `success_rate == 1 - error_count / total_requests`.
#[derive(Debug, Clone)]
pub struct MetricsRecord {
    /// Exponentially smoothed response time in milliseconds
    pub response_time_ms: f64,
    pub total_requests: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub last_used: Instant,
    /// Authoritative health bit, written by the health monitor and the
    /// consecutive-failure policy; never derived from `error_count`.
    pub is_healthy: bool,
    /// Recent request pressure in [0, 1]
    pub load_factor: f64,
    /// Externally supplied fitness in [0, 1], defaults to 1.0
    pub capability_score: f64,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self {
            response_time_ms: 0.0,
            total_requests: 0,
            error_count: 0,
            success_rate: 1.0,
            last_used: Instant::now(),
            is_healthy: true,
            load_factor: 0.0,
            capability_score: 1.0,
        }
    }
}

impl Default for MetricsRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite quality score derived from a [`MetricsRecord`].
///
/// All components are in [0, 1]; `overall` is the weighted blend
/// 0.30 performance + 0.30 reliability + 0.20 capability + 0.20 load.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QualityScore {
    pub performance: f64,
    pub reliability: f64,
    pub capability: f64,
    pub load: f64,
    pub overall: f64,
}

impl Default for QualityScore {
    fn default() -> Self {
        Self {
            performance: 1.0,
            reliability: 1.0,
            capability: 1.0,
            load: 1.0,
            overall: 1.0,
        }
    }
}
