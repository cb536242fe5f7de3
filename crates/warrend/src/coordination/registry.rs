//! TTL-leased membership directory.
//!
//! Each node keeps `{root}/nodes/{name}` alive by re-registering before the
//! lease runs out. Entries nobody refreshes disappear on their own; a
//! reconciler holding the cluster lock may also remove a peer's stale entry.

use std::sync::Arc;
use std::time::Duration;

use warren_common::{NodeName, WarrenResult};

use super::{CoordinationBackend, Keyspace};
use crate::retry::RetryPolicy;

pub struct NodeRegistry {
    backend: Arc<dyn CoordinationBackend>,
    keyspace: Keyspace,
    ttl: Duration,
    retry: RetryPolicy,
}

impl NodeRegistry {
    pub fn new(
        backend: Arc<dyn CoordinationBackend>,
        keyspace: Keyspace,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            keyspace,
            ttl,
            retry,
        }
    }

    /// Currently registered nodes, sorted
    pub async fn list(&self) -> WarrenResult<Vec<NodeName>> {
        let prefix = self.keyspace.nodes_prefix();
        let entries = self
            .retry
            .run("registry.list", || self.backend.list(&prefix))
            .await?;

        let mut nodes: Vec<NodeName> = entries
            .into_iter()
            .map(|(_, value)| NodeName::from(value))
            .collect();
        nodes.sort();
        nodes.dedup();
        Ok(nodes)
    }

    /// Create or refresh this node's entry and its lease
    pub async fn register(&self, name: &NodeName) -> WarrenResult<()> {
        let key = self.keyspace.node(name);
        self.retry
            .run("registry.register", || {
                self.backend.set(&key, name.as_str(), Some(self.ttl))
            })
            .await?;

        tracing::debug!(node = %name, ttl = ?self.ttl, "Node registration refreshed");
        Ok(())
    }

    /// Remove an entry. Only called while holding the cluster lock.
    pub async fn deregister(&self, name: &NodeName) -> WarrenResult<()> {
        let key = self.keyspace.node(name);
        self.retry
            .run("registry.deregister", || self.backend.delete(&key))
            .await?;

        tracing::info!(node = %name, "Node deregistered");
        Ok(())
    }
}
