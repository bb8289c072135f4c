//! Selection Strategies

use super::types::{SelectionRequest, ServerCandidate};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Millisecond timeout below which the adaptive strategy treats a
/// request as latency-sensitive
const ADAPTIVE_LATENCY_THRESHOLD_MS: u64 = 1000;

/// A server-selection policy over the healthy candidate set
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick one candidate, or none when the set is empty.
    fn select(&self, request: &SelectionRequest, candidates: &[ServerCandidate])
        -> Option<String>;
}

/// Argmax of the overall quality score
#[derive(Debug, Default)]
pub struct QualityStrategy;

impl SelectionStrategy for QualityStrategy {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn select(&self, _request: &SelectionRequest, candidates: &[ServerCandidate]) -> Option<String> {
        candidates
            .iter()
            .max_by(|a, b| a.score.overall.total_cmp(&b.score.overall))
            .map(|c| c.name.clone())
    }
}

/// Argmin of the smoothed response time
#[derive(Debug, Default)]
pub struct PerformanceStrategy;

impl SelectionStrategy for PerformanceStrategy {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn select(&self, _request: &SelectionRequest, candidates: &[ServerCandidate]) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| a.record.response_time_ms.total_cmp(&b.record.response_time_ms))
            .map(|c| c.name.clone())
    }
}

/// Argmin of the load factor
#[derive(Debug, Default)]
pub struct LoadBalancedStrategy;

impl SelectionStrategy for LoadBalancedStrategy {
    fn name(&self) -> &'static str {
        "load-balanced"
    }

    fn select(&self, _request: &SelectionRequest, candidates: &[ServerCandidate]) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| a.record.load_factor.total_cmp(&b.record.load_factor))
            .map(|c| c.name.clone())
    }
}

/// Stateful rotation over the healthy set. Candidates are visited in
/// name order so the rotation is stable across calls.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    index: AtomicUsize,
}

impl SelectionStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, _request: &SelectionRequest, candidates: &[ServerCandidate]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }

        let mut names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();

        let index = self.index.fetch_add(1, Ordering::Relaxed) % names.len();
        Some(names[index].to_string())
    }
}

/// Request-aware dispatch: latency-sensitive requests go to the
/// fastest upstream, high-priority requests to the most reliable,
/// everything else by overall quality.
#[derive(Debug, Default)]
pub struct AdaptiveStrategy {
    performance: PerformanceStrategy,
    quality: QualityStrategy,
}

impl AdaptiveStrategy {
    /// Which inner policy a request resolves to; also used for the
    /// engine's reason string.
    pub fn route(request: &SelectionRequest) -> AdaptiveRoute {
        if matches!(request.timeout_ms, Some(t) if t < ADAPTIVE_LATENCY_THRESHOLD_MS) {
            AdaptiveRoute::Performance
        } else if request.priority.as_deref() == Some("high") {
            AdaptiveRoute::Reliability
        } else {
            AdaptiveRoute::Quality
        }
    }
}

/// The three paths the adaptive strategy can take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveRoute {
    Performance,
    Reliability,
    Quality,
}

impl SelectionStrategy for AdaptiveStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn select(&self, request: &SelectionRequest, candidates: &[ServerCandidate]) -> Option<String> {
        match Self::route(request) {
            AdaptiveRoute::Performance => self.performance.select(request, candidates),
            AdaptiveRoute::Reliability => candidates
                .iter()
                .max_by(|a, b| a.record.success_rate.total_cmp(&b.record.success_rate))
                .map(|c| c.name.clone()),
            AdaptiveRoute::Quality => self.quality.select(request, candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsRecord, QualityScore};

    fn candidate(name: &str, rt_ms: f64, success_rate: f64, load: f64, overall: f64) -> ServerCandidate {
        let mut record = MetricsRecord::new();
        record.response_time_ms = rt_ms;
        record.success_rate = success_rate;
        record.load_factor = load;

        ServerCandidate {
            name: name.to_string(),
            record,
            score: QualityScore {
                performance: 1.0 - rt_ms / 5000.0,
                reliability: success_rate,
                capability: 1.0,
                load: 1.0 - load,
                overall,
            },
        }
    }

    #[test]
    fn test_quality_picks_highest_overall() {
        let candidates = vec![
            candidate("a", 100.0, 0.9, 0.1, 0.7),
            candidate("b", 300.0, 0.99, 0.1, 0.9),
        ];
        let pick = QualityStrategy.select(&SelectionRequest::default(), &candidates);
        assert_eq!(pick.as_deref(), Some("b"));
    }

    #[test]
    fn test_performance_picks_lowest_response_time() {
        let candidates = vec![
            candidate("fast", 100.0, 0.95, 0.5, 0.6),
            candidate("slow", 800.0, 0.999, 0.1, 0.9),
        ];
        let pick = PerformanceStrategy.select(&SelectionRequest::default(), &candidates);
        assert_eq!(pick.as_deref(), Some("fast"));
    }

    #[test]
    fn test_load_balanced_picks_least_loaded() {
        let candidates = vec![
            candidate("busy", 100.0, 1.0, 0.9, 0.8),
            candidate("idle", 200.0, 1.0, 0.1, 0.7),
        ];
        let pick = LoadBalancedStrategy.select(&SelectionRequest::default(), &candidates);
        assert_eq!(pick.as_deref(), Some("idle"));
    }

    #[test]
    fn test_round_robin_rotates() {
        let candidates = vec![
            candidate("a", 1.0, 1.0, 0.0, 1.0),
            candidate("b", 1.0, 1.0, 0.0, 1.0),
        ];
        let strategy = RoundRobinStrategy::default();
        let request = SelectionRequest::default();

        let first = strategy.select(&request, &candidates).unwrap();
        let second = strategy.select(&request, &candidates).unwrap();
        let third = strategy.select(&request, &candidates).unwrap();

        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_adaptive_latency_sensitive_goes_to_fastest() {
        let candidates = vec![
            candidate("x", 100.0, 0.95, 0.0, 0.8),
            candidate("y", 800.0, 0.999, 0.0, 0.85),
        ];
        let request = SelectionRequest {
            timeout_ms: Some(500),
            ..Default::default()
        };
        let pick = AdaptiveStrategy::default().select(&request, &candidates);
        assert_eq!(pick.as_deref(), Some("x"));
    }

    #[test]
    fn test_adaptive_high_priority_goes_to_most_reliable() {
        let candidates = vec![
            candidate("x", 100.0, 0.95, 0.0, 0.8),
            candidate("y", 800.0, 0.999, 0.0, 0.85),
        ];
        let request = SelectionRequest {
            priority: Some("high".to_string()),
            ..Default::default()
        };
        let pick = AdaptiveStrategy::default().select(&request, &candidates);
        assert_eq!(pick.as_deref(), Some("y"));
    }

    #[test]
    fn test_adaptive_defaults_to_quality() {
        let candidates = vec![
            candidate("x", 100.0, 0.95, 0.0, 0.8),
            candidate("y", 800.0, 0.999, 0.0, 0.85),
        ];
        let pick = AdaptiveStrategy::default().select(&SelectionRequest::default(), &candidates);
        assert_eq!(pick.as_deref(), Some("y"));
    }

    #[test]
    fn test_empty_candidate_set_yields_none() {
        let request = SelectionRequest::default();
        assert!(QualityStrategy.select(&request, &[]).is_none());
        assert!(RoundRobinStrategy::default().select(&request, &[]).is_none());
        assert!(AdaptiveStrategy::default().select(&request, &[]).is_none());
    }
}
