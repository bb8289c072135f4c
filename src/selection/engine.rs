//! Selector Engine

use super::strategies::{
    AdaptiveRoute, AdaptiveStrategy, LoadBalancedStrategy, PerformanceStrategy, QualityStrategy,
    RoundRobinStrategy, SelectionStrategy,
};
use super::types::{SelectionRequest, SelectionResult, ServerCandidate};
use crate::config::StrategyKind;
use crate::metrics::MetricsStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maximum number of runners-up reported per selection
const MAX_ALTERNATIVES: usize = 3;

/// Name-keyed strategy registry driven by the metrics store.
///
/// Candidates are the strictly healthy upstreams: the metrics record's
/// health bit must be set, not merely the transport connected.
pub struct SelectorEngine {
    strategies: HashMap<&'static str, Arc<dyn SelectionStrategy>>,
    metrics: Arc<MetricsStore>,
    default: StrategyKind,
    fallback: StrategyKind,
}

impl SelectorEngine {
    /// Register the built-in strategies at startup.
    pub fn new(metrics: Arc<MetricsStore>, default: StrategyKind, fallback: StrategyKind) -> Self {
        let mut strategies: HashMap<&'static str, Arc<dyn SelectionStrategy>> = HashMap::new();

        for strategy in [
            Arc::new(QualityStrategy) as Arc<dyn SelectionStrategy>,
            Arc::new(PerformanceStrategy),
            Arc::new(LoadBalancedStrategy),
            Arc::new(RoundRobinStrategy::default()),
            Arc::new(AdaptiveStrategy::default()),
        ] {
            strategies.insert(strategy.name(), strategy);
        }

        Self {
            strategies,
            metrics,
            default,
            fallback,
        }
    }

    /// Registered strategy names, sorted.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn default_strategy(&self) -> StrategyKind {
        self.default
    }

    pub fn fallback_strategy(&self) -> StrategyKind {
        self.fallback
    }

    /// Run a selection pass. `strategy` defaults to the configured
    /// default; an unknown name or an empty pick falls back to the
    /// configured fallback strategy.
    pub async fn select(
        &self,
        strategy: Option<&str>,
        request: &SelectionRequest,
    ) -> Option<SelectionResult> {
        let mut candidates: Vec<ServerCandidate> = self
            .metrics
            .healthy_candidates()
            .await
            .into_iter()
            .map(|(name, record, score)| ServerCandidate {
                name,
                record,
                score,
            })
            .collect();

        if candidates.is_empty() {
            debug!("Selection requested with no healthy candidates");
            return None;
        }

        // Overall-score order drives confidence and alternatives
        candidates.sort_by(|a, b| b.score.overall.total_cmp(&a.score.overall));

        let requested = strategy.unwrap_or(self.default.as_str());
        let (name, picked) = match self.strategies.get(requested) {
            Some(strategy) => (requested, strategy.select(request, &candidates)),
            None => (self.fallback.as_str(), None),
        };

        let (strategy_name, selected) = match picked {
            Some(selected) => (name, selected),
            None => {
                let fallback = self.strategies.get(self.fallback.as_str())?;
                (
                    self.fallback.as_str(),
                    fallback.select(request, &candidates)?,
                )
            }
        };

        let rank = candidates
            .iter()
            .position(|c| c.name == selected)
            .unwrap_or(candidates.len() - 1);
        let confidence = 1.0 - rank as f64 / candidates.len() as f64;

        let alternatives: Vec<String> = candidates
            .iter()
            .filter(|c| c.name != selected)
            .take(MAX_ALTERNATIVES)
            .map(|c| c.name.clone())
            .collect();

        let estimated_response_time_ms = candidates
            .iter()
            .find(|c| c.name == selected)
            .map(|c| c.record.response_time_ms)
            .unwrap_or_default();

        Some(SelectionResult {
            selected_server: selected,
            confidence,
            reason: Self::reason(strategy_name, request, candidates.len()),
            alternatives,
            estimated_response_time_ms,
            strategy_name: strategy_name.to_string(),
        })
    }

    fn reason(strategy: &str, request: &SelectionRequest, healthy: usize) -> String {
        let basis = match strategy {
            "quality" => "highest overall quality score".to_string(),
            "performance" => "lowest smoothed response time".to_string(),
            "load-balanced" => "lowest load factor".to_string(),
            "round-robin" => "next in rotation".to_string(),
            "adaptive" => match AdaptiveStrategy::route(request) {
                AdaptiveRoute::Performance => {
                    "latency-sensitive request routed to fastest upstream".to_string()
                }
                AdaptiveRoute::Reliability => {
                    "high-priority request routed to most reliable upstream".to_string()
                }
                AdaptiveRoute::Quality => "routed by overall quality score".to_string(),
            },
            other => format!("strategy '{}'", other),
        };

        format!("{} among {} healthy candidates", basis, healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn store_with_two_servers() -> Arc<MetricsStore> {
        let store = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        store.initialize("x").await;
        store.initialize("y").await;

        // x: fast but imperfect
        for _ in 0..19 {
            store.record_request("x", 100.0, true).await;
        }
        store.record_request("x", 100.0, false).await;

        // y: slow but flawless
        for _ in 0..20 {
            store.record_request("y", 800.0, true).await;
        }

        store
    }

    #[tokio::test]
    async fn test_adaptive_paths_over_live_store() {
        let store = store_with_two_servers().await;
        let engine = SelectorEngine::new(store, StrategyKind::Adaptive, StrategyKind::Quality);

        let latency_sensitive = SelectionRequest {
            timeout_ms: Some(500),
            ..Default::default()
        };
        let result = engine.select(None, &latency_sensitive).await.unwrap();
        assert_eq!(result.selected_server, "x");
        assert_eq!(result.strategy_name, "adaptive");

        let high_priority = SelectionRequest {
            priority: Some("high".to_string()),
            ..Default::default()
        };
        let result = engine.select(None, &high_priority).await.unwrap();
        assert_eq!(result.selected_server, "y");
    }

    #[tokio::test]
    async fn test_confidence_and_alternatives() {
        let store = store_with_two_servers().await;
        let engine = SelectorEngine::new(store, StrategyKind::Quality, StrategyKind::Quality);

        let result = engine
            .select(None, &SelectionRequest::default())
            .await
            .unwrap();
        // The top-ranked pick has full confidence and one runner-up
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.alternatives.len(), 1);
        assert!(result.estimated_response_time_ms > 0.0);
    }

    #[tokio::test]
    async fn test_unknown_strategy_falls_back() {
        let store = store_with_two_servers().await;
        let engine = SelectorEngine::new(store, StrategyKind::Adaptive, StrategyKind::Performance);

        let result = engine
            .select(Some("no-such-strategy"), &SelectionRequest::default())
            .await
            .unwrap();
        assert_eq!(result.strategy_name, "performance");
        assert_eq!(result.selected_server, "x");
    }

    #[tokio::test]
    async fn test_unhealthy_candidates_are_invisible() {
        let store = store_with_two_servers().await;
        store.mark_unhealthy("x", None).await;
        let engine = SelectorEngine::new(store, StrategyKind::Performance, StrategyKind::Quality);

        let result = engine
            .select(None, &SelectionRequest::default())
            .await
            .unwrap();
        // x is faster but unhealthy; the selector never sees it
        assert_eq!(result.selected_server, "y");
    }

    #[tokio::test]
    async fn test_no_healthy_candidates_yields_none() {
        let store = Arc::new(MetricsStore::new(Duration::from_secs(3600)));
        let engine = SelectorEngine::new(store, StrategyKind::Quality, StrategyKind::Quality);
        assert!(engine
            .select(None, &SelectionRequest::default())
            .await
            .is_none());
    }
}
