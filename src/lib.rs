//! mcproxy Library
//!
//! Aggregating proxy for the Model Context Protocol (MCP).
//!
//! Fronts a fleet of heterogeneous upstream MCP servers with a single
//! downstream endpoint: listings are fanned out and merged, targeted
//! calls are routed to the upstream that owns the named tool, prompt,
//! or resource.

pub mod config;
pub mod health;
pub mod management;
pub mod metrics;
pub mod protocol;
pub mod routing;
pub mod selection;
pub mod server;
pub mod shutdown;
pub mod upstream;

pub use config::Config;
pub use server::ProxyServer;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy
pub type Result<T> = anyhow::Result<T>;
