//! Health Monitor

use super::{HealthCheck, HealthSummary};
use crate::metrics::MetricsStore;
use crate::upstream::{UpstreamClient, UpstreamRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type CheckMap = Arc<RwLock<HashMap<String, HealthCheck>>>;

/// Consecutive connection-class failures at which the dispatch policy
/// marks an upstream unhealthy
const UNHEALTHY_FAILURE_THRESHOLD: u32 = 5;

/// How stale the last check must be before a recovery attempt counts
const RECOVERY_WINDOW: Duration = Duration::from_secs(60);

/// Periodic liveness inspection over the upstream fleet.
///
/// Probes never reconnect, never remove an upstream, and never count
/// as requests; they only observe connection state and write the
/// health bit.
pub struct HealthMonitor {
    registry: UpstreamRegistry,
    metrics: Arc<MetricsStore>,
    checks: CheckMap,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(registry: UpstreamRegistry, metrics: Arc<MetricsStore>, interval: Duration) -> Self {
        Self {
            registry,
            metrics,
            checks: Arc::new(RwLock::new(HashMap::new())),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Start the periodic check loop; cancelled by [`stop`](Self::stop).
    pub fn start(&self) {
        let registry = Arc::clone(&self.registry);
        let metrics = Arc::clone(&self.metrics);
        let checks = Arc::clone(&self.checks);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                Self::run_pass(&registry, &metrics, &checks).await;
            }
        });

        let mut task = self.task.lock().expect("task lock poisoned");
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the periodic loop.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().expect("task lock poisoned").take() {
            handle.abort();
        }
    }

    /// One full pass over the fleet. Probes run concurrently and a
    /// panicking probe cannot abort its siblings.
    pub async fn run_checks(&self) {
        Self::run_pass(&self.registry, &self.metrics, &self.checks).await;
    }

    async fn run_pass(registry: &UpstreamRegistry, metrics: &Arc<MetricsStore>, checks: &CheckMap) {
        let clients: Vec<Arc<UpstreamClient>> =
            registry.read().await.values().cloned().collect();

        let mut handles = Vec::with_capacity(clients.len());
        for client in clients {
            let metrics = Arc::clone(metrics);
            handles.push(tokio::spawn(async move {
                Self::evaluate(&client, &metrics).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(check) => {
                    checks.write().await.insert(check.server_name.clone(), check);
                }
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }
    }

    /// Manually check a single upstream; same logic as the periodic
    /// pass, run synchronously. Returns the written check, or `None`
    /// for an unknown server.
    pub async fn trigger_check(&self, name: &str) -> Option<HealthCheck> {
        let client = self.registry.read().await.get(name).cloned()?;
        let check = Self::evaluate(&client, &self.metrics).await;
        self.checks
            .write()
            .await
            .insert(check.server_name.clone(), check.clone());
        Some(check)
    }

    async fn evaluate(client: &UpstreamClient, metrics: &MetricsStore) -> HealthCheck {
        let started = Instant::now();
        let name = client.name().to_string();

        let (is_healthy, error_message) = if !client.is_connected() {
            let error = client
                .last_error()
                .unwrap_or_else(|| "Connection not established".to_string());
            (false, Some(error))
        } else if let Some(error) = client.last_error() {
            // Connected but with a captured error observation, e.g. the
            // SSE readiness probe noticed a closed stream.
            (false, Some(error))
        } else {
            (true, None)
        };

        if is_healthy {
            metrics.mark_healthy(&name).await;
        } else {
            metrics
                .mark_unhealthy(&name, error_message.as_deref())
                .await;
        }

        debug!(
            "Health check for '{}': {}",
            name,
            if is_healthy { "healthy" } else { "unhealthy" }
        );

        HealthCheck {
            server_name: name,
            is_healthy,
            last_check: Instant::now(),
            error_message,
            response_time_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
        }
    }

    /// Names of upstreams whose last check was healthy.
    pub async fn healthy_servers(&self) -> Vec<String> {
        self.checks
            .read()
            .await
            .values()
            .filter(|c| c.is_healthy)
            .map(|c| c.server_name.clone())
            .collect()
    }

    /// Names of upstreams whose last check was unhealthy.
    pub async fn unhealthy_servers(&self) -> Vec<String> {
        self.checks
            .read()
            .await
            .values()
            .filter(|c| !c.is_healthy)
            .map(|c| c.server_name.clone())
            .collect()
    }

    /// Latest check per upstream.
    pub async fn all_checks(&self) -> HashMap<String, HealthCheck> {
        self.checks.read().await.clone()
    }

    /// Fleet summary with the mean smoothed response time.
    pub async fn summary(&self) -> HealthSummary {
        let checks = self.checks.read().await;
        let healthy = checks.values().filter(|c| c.is_healthy).count();

        HealthSummary {
            total: checks.len(),
            healthy,
            unhealthy: checks.len() - healthy,
            avg_response_time_ms: self.metrics.average_response_time_ms().await,
        }
    }

    /// Drop the stored check for a removed upstream.
    pub async fn remove(&self, name: &str) {
        self.checks.write().await.remove(name);
    }

    /// Dispatch policy knob: demote after this many consecutive
    /// connection-class failures.
    pub fn should_mark_unhealthy(&self, _name: &str, consecutive_failures: u32) -> bool {
        consecutive_failures >= UNHEALTHY_FAILURE_THRESHOLD
    }

    /// Dispatch policy knob: a recovery attempt counts once the last
    /// check has gone stale. Unknown servers can always recover.
    pub async fn can_recover(&self, name: &str) -> bool {
        match self.checks.read().await.get(name) {
            Some(check) => check.last_check.elapsed() > RECOVERY_WINDOW,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::McpTransport;
    use crate::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;

    struct NullTransport;

    #[async_trait]
    impl McpTransport for NullTransport {
        async fn request(&self, _method: &str, _params: Value) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn notify(&self, _method: &str, _params: Value) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }

        async fn close(&self) {}
    }

    fn registry_with(clients: Vec<UpstreamClient>) -> UpstreamRegistry {
        let map: HashMap<String, Arc<UpstreamClient>> = clients
            .into_iter()
            .map(|c| (c.name().to_string(), Arc::new(c)))
            .collect();
        Arc::new(RwLock::new(map))
    }

    #[tokio::test]
    async fn test_connected_upstream_is_healthy() {
        let client = UpstreamClient::with_transport("a", Arc::new(NullTransport));
        let registry = registry_with(vec![client]);
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        metrics.initialize("a").await;

        let monitor = HealthMonitor::new(registry, Arc::clone(&metrics), Duration::from_secs(30));
        monitor.run_checks().await;

        assert_eq!(monitor.healthy_servers().await, vec!["a".to_string()]);
        assert!(metrics.is_healthy("a").await);
    }

    #[tokio::test]
    async fn test_disconnected_upstream_is_unhealthy_with_error() {
        let client = UpstreamClient::with_transport("b", Arc::new(NullTransport));
        client.state().mark_disconnected("ECONNREFUSED");
        let registry = registry_with(vec![client]);
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        metrics.initialize("b").await;

        let monitor = HealthMonitor::new(registry, Arc::clone(&metrics), Duration::from_secs(30));
        monitor.run_checks().await;

        assert_eq!(monitor.unhealthy_servers().await, vec!["b".to_string()]);
        let checks = monitor.all_checks().await;
        assert_eq!(checks["b"].error_message.as_deref(), Some("ECONNREFUSED"));
        assert!(!metrics.is_healthy("b").await);
    }

    #[tokio::test]
    async fn test_probe_does_not_touch_error_count() {
        let client = UpstreamClient::with_transport("c", Arc::new(NullTransport));
        client.state().mark_disconnected("Connection lost");
        let registry = registry_with(vec![client]);
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        metrics.initialize("c").await;
        metrics.record_request("c", 10.0, true).await;

        let monitor = HealthMonitor::new(registry, Arc::clone(&metrics), Duration::from_secs(30));
        monitor.run_checks().await;

        let record = metrics.get("c").await.unwrap();
        assert_eq!(record.error_count, 0);
        assert_eq!(record.total_requests, 1);
    }

    #[tokio::test]
    async fn test_connected_with_captured_error_is_unhealthy() {
        let client = UpstreamClient::with_transport("d", Arc::new(NullTransport));
        client.state().record_error("Connection closed: SSE readyState is CLOSED");
        let registry = registry_with(vec![client]);
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        metrics.initialize("d").await;

        let monitor = HealthMonitor::new(registry, Arc::clone(&metrics), Duration::from_secs(30));
        monitor.run_checks().await;

        assert_eq!(monitor.unhealthy_servers().await, vec!["d".to_string()]);
    }

    #[tokio::test]
    async fn test_policy_knobs() {
        let registry = registry_with(vec![]);
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        let monitor = HealthMonitor::new(registry, metrics, Duration::from_secs(30));

        assert!(!monitor.should_mark_unhealthy("x", 4));
        assert!(monitor.should_mark_unhealthy("x", 5));
        // No check recorded yet: recovery is allowed
        assert!(monitor.can_recover("x").await);
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let up = UpstreamClient::with_transport("up", Arc::new(NullTransport));
        let down = UpstreamClient::with_transport("down", Arc::new(NullTransport));
        down.state().mark_disconnected("timeout");
        let registry = registry_with(vec![up, down]);
        let metrics = Arc::new(MetricsStore::new(Duration::from_secs(3600)));

        let monitor = HealthMonitor::new(registry, metrics, Duration::from_secs(30));
        monitor.run_checks().await;

        let summary = monitor.summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
    }
}
