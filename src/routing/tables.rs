//! Routing Tables

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// The three entity kinds the proxy routes by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Tool,
    Prompt,
    Resource,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tool => "tool",
            EntityKind::Prompt => "prompt",
            EntityKind::Resource => "resource",
        }
    }
}

/// Name-to-upstream maps for tools, prompts, and resources.
///
/// Each table is cleared and rebuilt wholesale by the aggregator on
/// every listing; duplicate names across upstreams resolve
/// last-writer-wins. Readers take per-entry snapshots, so a table may
/// be repopulated mid-request without affecting in-flight dispatches.
#[derive(Debug, Default)]
pub struct RoutingTables {
    tools: RwLock<HashMap<String, String>>,
    prompts: RwLock<HashMap<String, String>>,
    resources: RwLock<HashMap<String, String>>,
}

impl RoutingTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: EntityKind) -> &RwLock<HashMap<String, String>> {
        match kind {
            EntityKind::Tool => &self.tools,
            EntityKind::Prompt => &self.prompts,
            EntityKind::Resource => &self.resources,
        }
    }

    /// Snapshot lookup of the upstream owning `name`.
    pub async fn lookup(&self, kind: EntityKind, name: &str) -> Option<String> {
        self.table(kind).read().await.get(name).cloned()
    }

    /// Drop every entry of one kind, ahead of a rebuild.
    pub async fn clear(&self, kind: EntityKind) {
        self.table(kind).write().await.clear();
    }

    pub async fn insert(&self, kind: EntityKind, name: &str, server: &str) {
        self.table(kind)
            .write()
            .await
            .insert(name.to_string(), server.to_string());
    }

    /// Evict a single entry, e.g. after an upstream reports the named
    /// tool gone.
    pub async fn remove(&self, kind: EntityKind, name: &str) {
        if self.table(kind).write().await.remove(name).is_some() {
            debug!("Evicted {} '{}' from routing table", kind.as_str(), name);
        }
    }

    /// Drop every entry pointing at a removed upstream.
    pub async fn remove_server(&self, server: &str) {
        for kind in [EntityKind::Tool, EntityKind::Prompt, EntityKind::Resource] {
            self.table(kind)
                .write()
                .await
                .retain(|_, owner| owner != server);
        }
    }

    pub async fn snapshot(&self, kind: EntityKind) -> HashMap<String, String> {
        self.table(kind).read().await.clone()
    }

    pub async fn len(&self, kind: EntityKind) -> usize {
        self.table(kind).read().await.len()
    }
}
