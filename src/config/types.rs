//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure (mirrors `config.json`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<UpstreamConfig>,
    #[serde(default)]
    pub selection_strategy: SelectionStrategyConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// One configured upstream MCP server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub name: String,
    pub transport: TransportConfig,
    /// 1 = highest, 10 = lowest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Declared capability tags, e.g. "web-search"
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Soft concurrency ceiling for this upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<usize>,
}

/// Transport descriptor for an upstream
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON-RPC on stdio
    #[serde(rename_all = "camelCase")]
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Environment variable names inherited from the proxy's
        /// environment; unset variables are passed as empty strings.
        #[serde(default)]
        env: Vec<String>,
    },
    /// Server-sent events with a POST back-channel
    Sse { url: String },
}

/// Server-selection strategy names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Adaptive,
    Quality,
    Performance,
    LoadBalanced,
    RoundRobin,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Adaptive => "adaptive",
            StrategyKind::Quality => "quality",
            StrategyKind::Performance => "performance",
            StrategyKind::LoadBalanced => "load-balanced",
            StrategyKind::RoundRobin => "round-robin",
        }
    }
}

/// Selection and dispatch policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionStrategyConfig {
    #[serde(default = "default_strategy")]
    pub default: StrategyKind,
    #[serde(default = "default_fallback")]
    pub fallback: StrategyKind,
    /// General request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    /// Retry budget for non-tool-call operations
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Health probe cadence in milliseconds
    #[serde(default = "default_health_interval_ms")]
    pub health_check_interval: u64,
    #[serde(default)]
    pub timeouts: OperationTimeouts,
}

impl Default for SelectionStrategyConfig {
    fn default() -> Self {
        Self {
            default: default_strategy(),
            fallback: default_fallback(),
            timeout: default_timeout_ms(),
            max_retries: default_max_retries(),
            health_check_interval: default_health_interval_ms(),
            timeouts: OperationTimeouts::default(),
        }
    }
}

impl SelectionStrategyConfig {
    pub fn health_check_interval_duration(&self) -> Duration {
        Duration::from_millis(self.health_check_interval)
    }
}

/// Per-operation timeouts, all in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTimeouts {
    #[serde(default = "default_list_timeout_ms")]
    pub tools_list: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub tools_call: u64,
    #[serde(default = "default_get_timeout_ms")]
    pub prompts_get: u64,
    #[serde(default = "default_list_timeout_ms")]
    pub prompts_list: u64,
    #[serde(default = "default_list_timeout_ms")]
    pub resources_list: u64,
    #[serde(default = "default_get_timeout_ms")]
    pub resources_read: u64,
    #[serde(default = "default_list_timeout_ms")]
    pub resource_templates_list: u64,
    #[serde(default = "default_reinitialize_timeout_ms")]
    pub reinitialize: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay: u64,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            tools_list: default_list_timeout_ms(),
            tools_call: default_call_timeout_ms(),
            prompts_get: default_get_timeout_ms(),
            prompts_list: default_list_timeout_ms(),
            resources_list: default_list_timeout_ms(),
            resources_read: default_get_timeout_ms(),
            resource_templates_list: default_list_timeout_ms(),
            reinitialize: default_reinitialize_timeout_ms(),
            reconnect_delay: default_reconnect_delay_ms(),
        }
    }
}

impl OperationTimeouts {
    pub fn tools_list_duration(&self) -> Duration {
        Duration::from_millis(self.tools_list)
    }

    pub fn tools_call_duration(&self) -> Duration {
        Duration::from_millis(self.tools_call)
    }

    pub fn prompts_get_duration(&self) -> Duration {
        Duration::from_millis(self.prompts_get)
    }

    pub fn prompts_list_duration(&self) -> Duration {
        Duration::from_millis(self.prompts_list)
    }

    pub fn resources_list_duration(&self) -> Duration {
        Duration::from_millis(self.resources_list)
    }

    pub fn resources_read_duration(&self) -> Duration {
        Duration::from_millis(self.resources_read)
    }

    pub fn resource_templates_list_duration(&self) -> Duration {
        Duration::from_millis(self.resource_templates_list)
    }

    pub fn reinitialize_duration(&self) -> Duration {
        Duration::from_millis(self.reinitialize)
    }

    pub fn reconnect_delay_duration(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay)
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_hours")]
    pub metrics_retention_hours: u64,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
    #[serde(default)]
    pub management_api: ManagementApiConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_retention_hours: default_retention_hours(),
            alert_thresholds: AlertThresholds::default(),
            management_api: ManagementApiConfig::default(),
        }
    }
}

impl MonitoringConfig {
    pub fn retention_duration(&self) -> Duration {
        Duration::from_secs(self.metrics_retention_hours * 3600)
    }
}

/// Alerting thresholds surfaced through the observability API
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    /// Milliseconds of smoothed response time considered alarming
    #[serde(default = "default_timeout_ms")]
    pub response_time: u64,
    /// Error rate (1 - success rate) considered alarming
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    /// Fraction of the fleet unhealthy considered alarming
    #[serde(default = "default_unhealthy_fraction")]
    pub unhealthy_servers: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time: default_timeout_ms(),
            error_rate: default_error_rate(),
            unhealthy_servers: default_unhealthy_fraction(),
        }
    }
}

/// Observability API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_management_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ManagementApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_management_addr(),
        }
    }
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Adaptive
}

fn default_fallback() -> StrategyKind {
    StrategyKind::Quality
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    2
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_list_timeout_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_get_timeout_ms() -> u64 {
    15_000
}

fn default_reinitialize_timeout_ms() -> u64 {
    30_000
}

fn default_reconnect_delay_ms() -> u64 {
    2500
}

fn default_retention_hours() -> u64 {
    24
}

fn default_error_rate() -> f64 {
    0.1
}

fn default_unhealthy_fraction() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_management_addr() -> SocketAddr {
    "127.0.0.1:3000".parse().expect("valid default address")
}
