//! mcproxy - Aggregating MCP Proxy
//!
//! One MCP endpoint fronting a fleet of upstream MCP servers. Speaks
//! MCP to the downstream client on stdio and exposes an HTTP
//! observability API for the fleet.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcproxy::{
    config::ConfigManager, management::ManagementServer, server::stdio, ProxyServer,
    ShutdownCoordinator,
};

/// How long shutdown cleanup may take before the process exits anyway
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// CLI arguments for mcproxy
#[derive(Parser, Debug)]
#[command(name = "mcproxy")]
#[command(about = "Aggregating MCP proxy - one endpoint fronting a fleet of MCP servers")]
#[command(version)]
#[command(long_about = "
mcproxy - Aggregating MCP Proxy

Fronts any number of upstream MCP servers (child processes or SSE
endpoints) behind a single MCP endpoint on stdio. Tool, prompt, and
resource listings are merged across the fleet; calls are routed to the
upstream that owns the named entity.

Environment variables:
  MCPROXY_MANAGEMENT_ADDR       - Management API bind address
  MCPROXY_HEALTH_CHECK_INTERVAL - Health probe cadence in milliseconds
  MCPROXY_MAX_RETRIES           - Retry budget for targeted operations
  MCPROXY_LOG_LEVEL             - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.json",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Disable the management API regardless of configuration
    #[arg(long, help = "Disable the management API")]
    pub no_management: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting mcproxy v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigManager::load_from_file(&args.config)
        .context("Fatal startup error: configuration could not be loaded")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Servers: {}", config.servers.len());
        for server in &config.servers {
            info!("    {} ({:?})", server.name, server.transport);
        }
        info!(
            "  Selection: default={} fallback={}",
            config.selection_strategy.default.as_str(),
            config.selection_strategy.fallback.as_str()
        );
        info!(
            "  Health check interval: {}ms",
            config.selection_strategy.health_check_interval
        );
        info!(
            "  Management API: {}",
            if config.monitoring.management_api.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    // Build and start the proxy; startup errors here are fatal
    let management_config = config.monitoring.management_api.clone();
    let monitoring_enabled = config.monitoring.enabled;
    let proxy = Arc::new(ProxyServer::new(config));
    proxy
        .start()
        .await
        .context("Fatal startup error: proxy failed to start")?;

    let shutdown_coordinator = ShutdownCoordinator::new(SHUTDOWN_TIMEOUT);

    // Observability API
    let management_handle = if monitoring_enabled && management_config.enabled && !args.no_management
    {
        let management = ManagementServer::new(management_config.bind_addr, Arc::clone(&proxy));
        Some(tokio::spawn(async move {
            if let Err(e) = management.start().await {
                error!("Management API server error: {}", e);
            }
        }))
    } else {
        info!("Management API disabled");
        None
    };

    // Downstream MCP surface on stdio
    let stdio_proxy = Arc::clone(&proxy);
    let stdio_shutdown = shutdown_coordinator.subscribe();
    let mut stdio_handle = tokio::spawn(async move {
        if let Err(e) = stdio::serve(stdio_proxy, stdio_shutdown).await {
            error!("stdio surface error: {}", e);
        }
    });

    info!("mcproxy started; serving MCP on stdio");

    // Run until a signal arrives or the downstream goes away
    tokio::select! {
        result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error in signal handler: {}", e);
            }
        }
        result = &mut stdio_handle => {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!("stdio task failed: {}", e);
                }
            }
            info!("Downstream connection closed");
            shutdown_coordinator.signal();
        }
    }

    info!("Initiating graceful shutdown");
    shutdown_coordinator.run_cleanup(&proxy).await;

    if let Some(handle) = management_handle {
        handle.abort();
        info!("Management API server shutdown");
    }
    stdio_handle.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging. The downstream protocol owns stdout, so
/// log lines go to stderr.
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        std::env::var("MCPROXY_LOG_LEVEL").unwrap_or_else(|_| args.log_level.clone())
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .with_ansi(false),
        )
        .with(env_filter)
        .init();

    Ok(())
}
