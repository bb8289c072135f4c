//! Configuration Manager

use super::{Config, StrategyKind, TransportConfig};
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .context("Configuration validation failed")?;

            tracing::info!(
                "Configuration loaded and validated ({} servers)",
                config.servers.len()
            );
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Self::load_from_env()?;
            Ok(config)
        }
    }

    /// Load defaults with environment variable overrides
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(addr) = std::env::var("MCPROXY_MANAGEMENT_ADDR") {
            config.monitoring.management_api.bind_addr = addr
                .parse()
                .with_context(|| format!("Invalid MCPROXY_MANAGEMENT_ADDR: {}", addr))?;
        }

        if let Ok(interval) = std::env::var("MCPROXY_HEALTH_CHECK_INTERVAL") {
            config.selection_strategy.health_check_interval = interval
                .parse::<u64>()
                .with_context(|| format!("Invalid MCPROXY_HEALTH_CHECK_INTERVAL: {}", interval))?;
        }

        if let Ok(retries) = std::env::var("MCPROXY_MAX_RETRIES") {
            config.selection_strategy.max_retries = retries
                .parse::<u32>()
                .with_context(|| format!("Invalid MCPROXY_MAX_RETRIES: {}", retries))?;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_servers()
            .context("Server configuration validation failed")?;

        self.validate_selection()
            .context("Selection strategy validation failed")?;

        self.validate_monitoring()
            .context("Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_servers(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for server in &self.servers {
            if server.name.is_empty() {
                bail!("server name must not be empty");
            }

            if !seen.insert(server.name.as_str()) {
                bail!("duplicate server name: {}", server.name);
            }

            match &server.transport {
                TransportConfig::Stdio { command, .. } => {
                    if command.is_empty() {
                        bail!("server '{}': stdio command must not be empty", server.name);
                    }
                }
                TransportConfig::Sse { url } => {
                    url::Url::parse(url).with_context(|| {
                        format!("server '{}': invalid SSE url '{}'", server.name, url)
                    })?;
                }
            }

            if let Some(priority) = server.priority {
                if !(1..=10).contains(&priority) {
                    bail!(
                        "server '{}': priority must be between 1 and 10, got {}",
                        server.name,
                        priority
                    );
                }
            }

            if let Some(0) = server.max_concurrent_requests {
                bail!(
                    "server '{}': maxConcurrentRequests must be greater than 0",
                    server.name
                );
            }
        }

        Ok(())
    }

    fn validate_selection(&self) -> Result<()> {
        let selection = &self.selection_strategy;

        if selection.timeout == 0 {
            bail!("timeout must be greater than 0");
        }

        if selection.health_check_interval == 0 {
            bail!("healthCheckInterval must be greater than 0");
        }

        let timeouts = [
            ("toolsList", selection.timeouts.tools_list),
            ("toolsCall", selection.timeouts.tools_call),
            ("promptsGet", selection.timeouts.prompts_get),
            ("promptsList", selection.timeouts.prompts_list),
            ("resourcesList", selection.timeouts.resources_list),
            ("resourcesRead", selection.timeouts.resources_read),
            (
                "resourceTemplatesList",
                selection.timeouts.resource_templates_list,
            ),
            ("reinitialize", selection.timeouts.reinitialize),
        ];

        for (name, value) in timeouts {
            if value == 0 {
                bail!("timeouts.{} must be greater than 0", name);
            }
        }

        if selection.default == selection.fallback
            && selection.default == StrategyKind::RoundRobin
        {
            tracing::warn!("default and fallback strategy are both round-robin");
        }

        Ok(())
    }

    fn validate_monitoring(&self) -> Result<()> {
        let thresholds = &self.monitoring.alert_thresholds;

        if !(0.0..=1.0).contains(&thresholds.error_rate) {
            bail!("alertThresholds.errorRate must be within [0, 1]");
        }

        if !(0.0..=1.0).contains(&thresholds.unhealthy_servers) {
            bail!("alertThresholds.unhealthyServers must be within [0, 1]");
        }

        if self.monitoring.metrics_retention_hours == 0 {
            bail!("metricsRetentionHours must be greater than 0");
        }

        Ok(())
    }
}
