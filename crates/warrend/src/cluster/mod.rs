//! Broker-side collaborators of the reconciler.
//!
//! The reconciler only sequences calls; the broker's own clustering protocol
//! sits behind these traits:
//! - [`ClusterControlPlane`] - administrative commands (`rabbitmqctl`)
//! - [`ClusterStatusProvider`] - liveness and membership view (management API)
//! - [`LocalSecretInstaller`] - puts the cookie where the broker reads it

mod cookie;
mod management;
mod rabbitmqctl;

use async_trait::async_trait;
use warren_common::{ClusterCookie, ClusterSnapshot, NodeName, WarrenResult};

pub use cookie::FileSecretInstaller;
pub use management::{ManagementApi, ManagementConfig};
pub use rabbitmqctl::RabbitmqCtl;

/// Administrative surface of the broker's clustering layer
#[async_trait]
pub trait ClusterControlPlane: Send + Sync {
    /// Number of members the local broker believes its cluster has
    async fn local_cluster_size(&self) -> WarrenResult<usize>;

    /// Stop the broker application (the runtime keeps running)
    async fn stop_local(&self) -> WarrenResult<()>;

    /// Start the broker application
    async fn start_local(&self) -> WarrenResult<()>;

    /// Join the cluster `peer` belongs to. The app must be stopped.
    async fn join(&self, peer: &NodeName) -> WarrenResult<()>;

    /// Remove a member that is no longer running from the cluster
    async fn forget_member(&self, name: &NodeName) -> WarrenResult<()>;
}

/// Read-only view of the local broker
#[async_trait]
pub trait ClusterStatusProvider: Send + Sync {
    /// True when the broker passes its aliveness test. Never errors:
    /// any failure to reach the broker is `false`.
    async fn is_alive(&self) -> bool;

    /// Members and their running state, as the broker sees them
    async fn current_snapshot(&self) -> WarrenResult<ClusterSnapshot>;

    /// The local node's name. Cached after the first successful read.
    async fn self_name(&self) -> WarrenResult<NodeName>;
}

/// Installs the cluster cookie for the local broker
#[async_trait]
pub trait LocalSecretInstaller: Send + Sync {
    async fn install(&self, cookie: &ClusterCookie) -> WarrenResult<()>;
}
