//! Upstream Module
//!
//! Connection lifecycle for a single upstream MCP server: transports,
//! connection state, and the client facade used by the proxy.

pub mod client;
pub mod state;
pub mod transport;

pub use client::UpstreamClient;
pub use state::ConnectionState;
pub use transport::{McpTransport, SseTransport, StdioTransport};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared registry of upstream clients, keyed by server name.
///
/// Owned by the proxy server; the aggregator, health monitor, and
/// management API hold clones of the `Arc`.
pub type UpstreamRegistry = Arc<RwLock<HashMap<String, Arc<UpstreamClient>>>>;
