//! Write-once storage for the cluster cookie.

use std::sync::Arc;

use warren_common::{ClusterCookie, WarrenResult};

use super::{CoordinationBackend, Keyspace};
use crate::retry::RetryPolicy;

pub struct SecretStore {
    backend: Arc<dyn CoordinationBackend>,
    key: String,
    retry: RetryPolicy,
}

impl SecretStore {
    pub fn new(backend: Arc<dyn CoordinationBackend>, keyspace: &Keyspace, retry: RetryPolicy) -> Self {
        Self {
            backend,
            key: keyspace.secret(),
            retry,
        }
    }

    /// Current cookie, `None` if no node or operator has stored one yet
    pub async fn get(&self) -> WarrenResult<Option<ClusterCookie>> {
        let value = self
            .retry
            .run("secret.get", || self.backend.get(&self.key))
            .await?;

        Ok(value.map(ClusterCookie::new).filter(|c| !c.is_empty()))
    }

    /// Store `cookie` unless one already exists.
    ///
    /// Returns true when this value became the cluster cookie. Losing to an
    /// earlier writer is not an error.
    pub async fn set(&self, cookie: &ClusterCookie) -> WarrenResult<bool> {
        let stored = self
            .retry
            .run("secret.set", || self.backend.create(&self.key, cookie.expose()))
            .await?;

        if stored {
            tracing::info!(fingerprint = %cookie.fingerprint(), "Cluster cookie stored");
        } else {
            tracing::info!("Cluster cookie already present, keeping existing value");
        }
        Ok(stored)
    }
}
