//! Retry Policy
//!
//! Wraps every targeted upstream dispatch: records metrics, classifies
//! failures, retries connection-class errors with exponential backoff,
//! and drives the consecutive-failure demotion policy.

use super::errors::{ErrorClass, ErrorClassifier, SubstringClassifier};
use crate::health::HealthMonitor;
use crate::metrics::MetricsStore;
use crate::Result;
use anyhow::anyhow;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Base unit of the exponential backoff: 2^attempt x 1000 ms
const BACKOFF_BASE_MS: u64 = 1000;

/// Cap on the backoff exponent
const BACKOFF_MAX_EXPONENT: u32 = 6;

/// Executes upstream operations under the retry policy
pub struct RetryExecutor {
    metrics: Arc<MetricsStore>,
    health: Arc<HealthMonitor>,
    classifier: Arc<dyn ErrorClassifier>,
    /// Consecutive connection-class failures per upstream; reset on
    /// any success, untouched by business-class failures.
    failures: RwLock<HashMap<String, u32>>,
}

impl RetryExecutor {
    pub fn new(metrics: Arc<MetricsStore>, health: Arc<HealthMonitor>) -> Self {
        Self::with_classifier(metrics, health, Arc::new(SubstringClassifier))
    }

    /// Swap in a custom classification predicate.
    pub fn with_classifier(
        metrics: Arc<MetricsStore>,
        health: Arc<HealthMonitor>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        Self {
            metrics,
            health,
            classifier,
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Run `op` against `server` with up to `max_retries + 1` attempts
    /// under the per-attempt `op_timeout`.
    pub async fn execute<F, Fut>(
        &self,
        server: &str,
        max_retries: u32,
        op_timeout: Duration,
        mut op: F,
    ) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let result = match tokio::time::timeout(op_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "timeout after {}ms waiting for '{}'",
                    op_timeout.as_millis(),
                    server
                )),
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(value) => {
                    self.metrics.record_request(server, elapsed_ms, true).await;
                    self.failures.write().await.remove(server);
                    self.maybe_recover(server).await;
                    return Ok(value);
                }
                Err(error) => {
                    self.metrics.record_request(server, elapsed_ms, false).await;
                    let message = error.to_string();

                    match self.classifier.classify(&message) {
                        ErrorClass::Business => {
                            // Surfaced verbatim; does not count toward
                            // demotion and is never retried.
                            debug!("Business error from '{}': {}", server, message);
                            return Err(error);
                        }
                        ErrorClass::Connection => {
                            let count = self.bump_failures(server).await;
                            warn!(
                                "Connection error from '{}' ({} consecutive): {}",
                                server, count, message
                            );

                            if self.health.should_mark_unhealthy(server, count) {
                                self.metrics.mark_unhealthy(server, Some(&message)).await;
                            }

                            if attempt >= max_retries {
                                return Err(error);
                            }

                            let backoff = Duration::from_millis(
                                BACKOFF_BASE_MS * 2u64.pow(attempt.min(BACKOFF_MAX_EXPONENT)),
                            );
                            debug!(
                                "Retrying '{}' (attempt {}/{}) after {:?}",
                                server,
                                attempt + 2,
                                max_retries + 1,
                                backoff
                            );
                            tokio::time::sleep(backoff).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    async fn bump_failures(&self, server: &str) -> u32 {
        let mut failures = self.failures.write().await;
        let count = failures.entry(server.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// A success against an unhealthy upstream flips it back once the
    /// monitor's recovery window has elapsed.
    async fn maybe_recover(&self, server: &str) {
        if !self.metrics.is_healthy(server).await && self.health.can_recover(server).await {
            self.metrics.mark_healthy(server).await;
        }
    }

    /// Current consecutive connection-class failure count.
    pub async fn consecutive_failures(&self, server: &str) -> u32 {
        self.failures.read().await.get(server).copied().unwrap_or(0)
    }

    /// Drop tracking state for a removed upstream.
    pub async fn remove(&self, server: &str) {
        self.failures.write().await.remove(server);
    }
}
