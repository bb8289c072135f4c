//! Metrics Store

use super::{MetricsRecord, QualityScore};
use crate::Result;
use prometheus::{HistogramVec, IntCounterVec, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Smoothing factor for the response-time EMA; new samples dominate
const EMA_ALPHA: f64 = 0.3;

/// Load-factor observation window
const LOAD_WINDOW: Duration = Duration::from_secs(60);

/// Requests per minute at which an upstream counts as saturated
const LOAD_SATURATION_RPM: f64 = 100.0;

/// Weight of the newest load sample in the running average
const LOAD_SAMPLE_WEIGHT: f64 = 0.7;

/// Decay applied when the gap since the last request exceeds the window
const LOAD_DECAY: f64 = 0.9;

/// Response time at which the performance component bottoms out
const RESPONSE_TIME_CEILING_MS: f64 = 5000.0;

/// Quality score component weights
const WEIGHT_PERFORMANCE: f64 = 0.30;
const WEIGHT_RELIABILITY: f64 = 0.30;
const WEIGHT_CAPABILITY: f64 = 0.20;
const WEIGHT_LOAD: f64 = 0.20;

/// Cadence of the idle-record eviction pass
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-upstream metrics with derived quality scores and bounded memory.
pub struct MetricsStore {
    records: Arc<RwLock<HashMap<String, MetricsRecord>>>,
    scores: Arc<RwLock<HashMap<String, QualityScore>>>,
    retention: Duration,
    cleanup: Mutex<Option<JoinHandle<()>>>,

    prometheus_registry: Registry,
    requests_total: IntCounterVec,
    errors_total: IntCounterVec,
    response_time: HistogramVec,
}

impl MetricsStore {
    pub fn new(retention: Duration) -> Self {
        let prometheus_registry = Registry::new();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("mcproxy_requests_total", "Requests dispatched per upstream"),
            &["server"],
        )
        .expect("Failed to create requests_total counter");

        let errors_total = IntCounterVec::new(
            prometheus::Opts::new("mcproxy_errors_total", "Failed requests per upstream"),
            &["server"],
        )
        .expect("Failed to create errors_total counter");

        let response_time = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "mcproxy_response_time_seconds",
                "Upstream response time in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
            &["server"],
        )
        .expect("Failed to create response_time histogram");

        prometheus_registry
            .register(Box::new(requests_total.clone()))
            .expect("Failed to register requests_total");
        prometheus_registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total");
        prometheus_registry
            .register(Box::new(response_time.clone()))
            .expect("Failed to register response_time");

        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            scores: Arc::new(RwLock::new(HashMap::new())),
            retention,
            cleanup: Mutex::new(None),
            prometheus_registry,
            requests_total,
            errors_total,
            response_time,
        }
    }

    /// Seed a fresh record: success rate 1.0, no load, healthy.
    pub async fn initialize(&self, name: &str) {
        self.records
            .write()
            .await
            .insert(name.to_string(), MetricsRecord::new());
        self.scores
            .write()
            .await
            .insert(name.to_string(), QualityScore::default());
        debug!("Initialized metrics record for '{}'", name);
    }

    /// Record one completed request and refresh the derived score.
    pub async fn record_request(&self, name: &str, elapsed_ms: f64, success: bool) {
        let mut records = self.records.write().await;
        let record = records
            .entry(name.to_string())
            .or_insert_with(MetricsRecord::new);

        let now = Instant::now();
        let gap = now.duration_since(record.last_used);

        record.total_requests += 1;
        if !success {
            record.error_count += 1;
        }
        record.success_rate = 1.0 - record.error_count as f64 / record.total_requests as f64;

        if record.total_requests == 1 {
            record.response_time_ms = elapsed_ms;
        } else {
            record.response_time_ms =
                EMA_ALPHA * elapsed_ms + (1.0 - EMA_ALPHA) * record.response_time_ms;
        }

        if record.total_requests == 1 {
            record.load_factor = instantaneous_load(record.total_requests, gap);
        } else if gap > LOAD_WINDOW {
            record.load_factor *= LOAD_DECAY;
        } else {
            let sample = instantaneous_load(record.total_requests, gap);
            record.load_factor =
                LOAD_SAMPLE_WEIGHT * sample + (1.0 - LOAD_SAMPLE_WEIGHT) * record.load_factor;
        }

        record.last_used = now;

        let score = compute_score(record);
        let record = record.clone();
        drop(records);

        self.scores.write().await.insert(name.to_string(), score);

        self.requests_total.with_label_values(&[name]).inc();
        if !success {
            self.errors_total.with_label_values(&[name]).inc();
        }
        self.response_time
            .with_label_values(&[name])
            .observe(elapsed_ms / 1000.0);

        debug!(
            "Recorded request for '{}': {:.0}ms success={} (rt={:.0}ms sr={:.3} load={:.3})",
            name, elapsed_ms, success, record.response_time_ms, record.success_rate, record.load_factor
        );
    }

    /// Flip the health bit to healthy. Health marks never touch the
    /// request counters: a liveness probe is not a request.
    pub async fn mark_healthy(&self, name: &str) {
        self.set_health(name, true, None).await;
    }

    /// Flip the health bit to unhealthy. Never touches `error_count`.
    pub async fn mark_unhealthy(&self, name: &str, reason: Option<&str>) {
        self.set_health(name, false, reason).await;
    }

    async fn set_health(&self, name: &str, healthy: bool, reason: Option<&str>) {
        let mut records = self.records.write().await;
        let record = records
            .entry(name.to_string())
            .or_insert_with(MetricsRecord::new);

        if record.is_healthy != healthy {
            match reason {
                Some(reason) => info!(
                    "Upstream '{}' marked {}: {}",
                    name,
                    if healthy { "healthy" } else { "unhealthy" },
                    reason
                ),
                None => info!(
                    "Upstream '{}' marked {}",
                    name,
                    if healthy { "healthy" } else { "unhealthy" }
                ),
            }
        }

        record.is_healthy = healthy;
        let score = compute_score(record);
        drop(records);

        self.scores.write().await.insert(name.to_string(), score);
    }

    /// Set the externally supplied capability score, clamped to [0, 1].
    pub async fn update_capability_score(&self, name: &str, score: f64) {
        let mut records = self.records.write().await;
        let record = records
            .entry(name.to_string())
            .or_insert_with(MetricsRecord::new);

        record.capability_score = score.clamp(0.0, 1.0);
        let quality = compute_score(record);
        drop(records);

        self.scores.write().await.insert(name.to_string(), quality);
    }

    pub async fn get(&self, name: &str) -> Option<MetricsRecord> {
        self.records.read().await.get(name).cloned()
    }

    pub async fn score(&self, name: &str) -> Option<QualityScore> {
        self.scores.read().await.get(name).copied()
    }

    pub async fn all(&self) -> HashMap<String, MetricsRecord> {
        self.records.read().await.clone()
    }

    pub async fn all_scores(&self) -> HashMap<String, QualityScore> {
        self.scores.read().await.clone()
    }

    pub async fn is_healthy(&self, name: &str) -> bool {
        self.records
            .read()
            .await
            .get(name)
            .map(|r| r.is_healthy)
            .unwrap_or(false)
    }

    /// Healthy candidates with their records and scores, for selection.
    pub async fn healthy_candidates(&self) -> Vec<(String, MetricsRecord, QualityScore)> {
        let records = self.records.read().await;
        let scores = self.scores.read().await;

        records
            .iter()
            .filter(|(_, record)| record.is_healthy)
            .map(|(name, record)| {
                let score = scores.get(name).copied().unwrap_or_default();
                (name.clone(), record.clone(), score)
            })
            .collect()
    }

    /// Mean smoothed response time across all tracked upstreams.
    pub async fn average_response_time_ms(&self) -> f64 {
        let records = self.records.read().await;
        if records.is_empty() {
            return 0.0;
        }
        records.values().map(|r| r.response_time_ms).sum::<f64>() / records.len() as f64
    }

    /// Drop the record and paired score for a removed upstream.
    pub async fn remove(&self, name: &str) {
        self.records.write().await.remove(name);
        self.scores.write().await.remove(name);
    }

    /// Evict records idle longer than the retention window.
    pub async fn evict_idle(&self) {
        evict(&self.records, &self.scores, self.retention).await;
    }

    /// Start the periodic eviction task; cancelled by
    /// [`stop_cleanup`](Self::stop_cleanup).
    pub fn start_cleanup(&self) {
        let records = Arc::clone(&self.records);
        let scores = Arc::clone(&self.scores);
        let retention = self.retention;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                evict(&records, &scores, retention).await;
            }
        });

        let mut cleanup = self.cleanup.lock().expect("cleanup lock poisoned");
        if let Some(old) = cleanup.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the eviction task.
    pub fn stop_cleanup(&self) {
        if let Some(handle) = self.cleanup.lock().expect("cleanup lock poisoned").take() {
            handle.abort();
        }
    }

    /// Prometheus text exposition of the request counters.
    pub fn export_prometheus(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metrics = self.prometheus_registry.gather();
        Ok(encoder.encode_to_string(&metrics)?)
    }
}

/// Drop records and their paired scores once idle past the retention
/// window.
async fn evict(
    records: &RwLock<HashMap<String, MetricsRecord>>,
    scores: &RwLock<HashMap<String, QualityScore>>,
    retention: Duration,
) {
    let mut records = records.write().await;
    let mut scores = scores.write().await;

    let stale: Vec<String> = records
        .iter()
        .filter(|(_, record)| record.last_used.elapsed() > retention)
        .map(|(name, _)| name.clone())
        .collect();

    for name in stale {
        records.remove(&name);
        scores.remove(&name);
        warn!("Evicted idle metrics record for '{}'", name);
    }
}

/// Requests-per-minute pressure normalized against the saturation point.
fn instantaneous_load(total_requests: u64, gap: Duration) -> f64 {
    let gap_ratio = (gap.as_secs_f64() / LOAD_WINDOW.as_secs_f64()).max(f64::EPSILON);
    let rpm = total_requests as f64 / gap_ratio;
    (rpm / LOAD_SATURATION_RPM).min(1.0)
}

/// Derive the composite quality score from a record.
fn compute_score(record: &MetricsRecord) -> QualityScore {
    let performance = (1.0 - record.response_time_ms / RESPONSE_TIME_CEILING_MS).max(0.0);
    let reliability = if record.is_healthy {
        record.success_rate
    } else {
        0.0
    };
    let capability = record.capability_score;
    let load = 1.0 - record.load_factor;

    QualityScore {
        performance,
        reliability,
        capability,
        load,
        overall: WEIGHT_PERFORMANCE * performance
            + WEIGHT_RELIABILITY * reliability
            + WEIGHT_CAPABILITY * capability
            + WEIGHT_LOAD * load,
    }
}
