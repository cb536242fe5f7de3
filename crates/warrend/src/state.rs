//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cluster::{FileSecretInstaller, ManagementApi, RabbitmqCtl};
use crate::config::AppConfig;
use crate::coordination::{Keyspace, LockService, NodeRegistry, RedisBackend, SecretStore};
use crate::reconciler::ClusterReconciler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Coordination service connection (auto-reconnecting)
    pub backend: Arc<RedisBackend>,

    /// This node's reconciler
    pub reconciler: Arc<ClusterReconciler>,
}

impl AppState {
    /// Connect to Redis and wire the reconciler to the local broker
    pub async fn new(config: AppConfig) -> Result<Self> {
        let backend = Arc::new(
            RedisBackend::connect(&config.coordination.redis_url)
                .await
                .context("Failed to connect to Redis")?,
        );

        let keyspace = Keyspace::new(&config.coordination.key_root);
        let retry = config.backend_retry();

        let lock = LockService::new(
            backend.clone(),
            &keyspace,
            retry.clone(),
            config.lock_poll_interval(),
        );
        let registry = NodeRegistry::new(
            backend.clone(),
            keyspace.clone(),
            config.node_ttl(),
            retry.clone(),
        );
        let secrets = SecretStore::new(backend.clone(), &keyspace, retry);

        let control = Arc::new(RabbitmqCtl::new(
            &config.control_plane.ctl_path,
            std::time::Duration::from_secs(config.control_plane.timeout_secs),
        ));
        let status = Arc::new(
            ManagementApi::new(config.management_config())
                .context("Failed to configure management API client")?,
        );
        let installer = Arc::new(FileSecretInstaller::new(
            &config.secret.cookie_path,
            config.cookie_owner(),
        ));

        let reconciler = ClusterReconciler::new(lock, registry, secrets, control, status, installer)
            .with_settings(config.reconciler_settings());

        Ok(Self {
            config,
            backend,
            reconciler: Arc::new(reconciler),
        })
    }
}
