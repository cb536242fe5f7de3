//! Per-node reconciliation state machine.
//!
//! ```text
//! Unbootstrapped --prestart--> Joining --join?--> AwaitingAliveness --register--> Registered
//!                                                                        |
//!                                       healthcheck / synchronize passes +
//! ```
//!
//! The reconciler only sequences calls. Fleet-wide decisions go through the
//! coordination service; broker work goes through the injected collaborators.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time::MissedTickBehavior;
use warren_common::{
    NodeName, ReconcilerState, ReconcilerStatus, WarrenError, WarrenResult,
};

use crate::cluster::{ClusterControlPlane, ClusterStatusProvider, LocalSecretInstaller};
use crate::coordination::{LockService, NodeRegistry, SecretStore};
use crate::retry::RetryPolicy;

/// Timing knobs for bootstrap and the periodic passes
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    /// Aliveness polling schedule during bootstrap
    pub alive_wait: RetryPolicy,
    pub healthcheck_interval: Duration,
    pub synchronize_interval: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            alive_wait: RetryPolicy::exponential(16, Duration::from_secs(1), Duration::from_secs(64)),
            healthcheck_interval: Duration::from_secs(5),
            synchronize_interval: Duration::from_secs(30),
        }
    }
}

pub struct ClusterReconciler {
    lock: LockService,
    registry: NodeRegistry,
    secrets: SecretStore,
    control: Arc<dyn ClusterControlPlane>,
    status: Arc<dyn ClusterStatusProvider>,
    installer: Arc<dyn LocalSecretInstaller>,
    settings: ReconcilerSettings,
    progress: RwLock<ReconcilerStatus>,
}

impl ClusterReconciler {
    pub fn new(
        lock: LockService,
        registry: NodeRegistry,
        secrets: SecretStore,
        control: Arc<dyn ClusterControlPlane>,
        status: Arc<dyn ClusterStatusProvider>,
        installer: Arc<dyn LocalSecretInstaller>,
    ) -> Self {
        Self {
            lock,
            registry,
            secrets,
            control,
            status,
            installer,
            settings: ReconcilerSettings::default(),
            progress: RwLock::new(ReconcilerStatus::default()),
        }
    }

    pub fn with_settings(mut self, settings: ReconcilerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn lock(&self) -> &LockService {
        &self.lock
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// Snapshot of this reconciler's progress
    pub async fn status(&self) -> ReconcilerStatus {
        self.progress.read().await.clone()
    }

    async fn update(&self, f: impl FnOnce(&mut ReconcilerStatus)) {
        f(&mut *self.progress.write().await);
    }

    async fn set_state(&self, state: ReconcilerState) {
        tracing::debug!(%state, "Reconciler state changed");
        self.update(|s| s.state = state).await;
    }

    /// Verify the cluster cookie exists and install it locally.
    ///
    /// A node never generates its own cookie; it must be seeded beforehand.
    pub async fn prestart(&self) -> WarrenResult<()> {
        let Some(cookie) = self.secrets.get().await? else {
            tracing::error!("Cluster cookie missing; seed it before starting nodes");
            return Err(WarrenError::MissingSecret);
        };

        self.installer.install(&cookie).await?;
        tracing::info!(fingerprint = %cookie.fingerprint(), "Prestart complete");
        Ok(())
    }

    /// Join a peer if needed, wait for the broker, then register.
    ///
    /// Runs under the fleet lock so nodes booting together serialize: the
    /// second one sees the first one's registration and joins it.
    pub async fn start(&self) -> WarrenResult<()> {
        let me = self.status.self_name().await?;
        self.update(|s| s.node = Some(me.clone())).await;

        self.lock
            .with_lock(|| async {
                self.set_state(ReconcilerState::Joining).await;
                self.join_if_unclustered(&me).await?;

                self.set_state(ReconcilerState::AwaitingAliveness).await;
                self.await_alive().await?;

                self.registry.register(&me).await?;
                self.set_state(ReconcilerState::Registered).await;
                Ok(())
            })
            .await?;

        tracing::info!(node = %me, "Node registered");
        Ok(())
    }

    /// Full bootstrap: prestart, wait for the broker to come up, start
    pub async fn bootstrap(&self) -> WarrenResult<()> {
        self.prestart().await?;
        self.set_state(ReconcilerState::AwaitingAliveness).await;
        self.await_alive().await?;
        self.start().await
    }

    /// Poll the aliveness test with backoff until it passes
    async fn await_alive(&self) -> WarrenResult<()> {
        let policy = &self.settings.alive_wait;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.status.is_alive().await {
                tracing::debug!(attempt, "Broker is alive");
                return Ok(());
            }
            if attempt >= policy.max_attempts {
                tracing::error!(attempts = attempt, "Broker never became alive");
                return Err(WarrenError::BootstrapTimeout { attempts: attempt });
            }

            let delay = policy.backoff.delay(attempt);
            tracing::info!(attempt, delay = ?delay, "Broker not alive yet, waiting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Join the first registered peer when the local broker is alone.
    ///
    /// Control-plane failures are not fatal: they set `join_pending` and the
    /// next maintenance pass tries again.
    async fn join_if_unclustered(&self, me: &NodeName) -> WarrenResult<()> {
        let size = match self.control.local_cluster_size().await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read local cluster size, join deferred");
                self.update(|s| s.join_pending = true).await;
                return Ok(());
            }
        };

        if size > 1 {
            tracing::debug!(size, "Already clustered, not joining");
            self.update(|s| s.join_pending = false).await;
            return Ok(());
        }

        let peers = self.registry.list().await?;
        let Some(target) = select_join_target(&peers, me) else {
            tracing::info!("No registered peers, starting a new cluster");
            self.update(|s| s.join_pending = false).await;
            return Ok(());
        };

        match self.join(&target).await {
            Ok(()) => {
                tracing::info!(peer = %target, "Joined cluster");
                self.update(|s| s.join_pending = false).await;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(peer = %target, error = %e, "Join failed, will retry");
                self.update(|s| s.join_pending = true).await;
                Ok(())
            }
        }
    }

    async fn join(&self, target: &NodeName) -> WarrenResult<()> {
        self.control.stop_local().await?;
        let joined = self.control.join(target).await;
        // The app was stopped, so bring it back whether or not the join worked
        let started = self.control.start_local().await;
        joined?;
        started
    }

    /// Refresh this node's registration if the broker is alive.
    ///
    /// Returns whether the registration was refreshed. A dead broker is left
    /// to expire from the registry.
    pub async fn healthcheck(&self) -> WarrenResult<bool> {
        if !self.status.is_alive().await {
            tracing::warn!("Broker not alive, skipping registration refresh");
            return Ok(false);
        }

        let me = self.status.self_name().await?;
        self.registry.register(&me).await?;
        self.update(|s| s.last_healthcheck = Some(chrono::Utc::now().timestamp()))
            .await;
        Ok(true)
    }

    /// Periodic pass: retry a deferred join, then healthcheck
    pub async fn maintain(&self) -> WarrenResult<bool> {
        if self.progress.read().await.join_pending {
            let me = self.status.self_name().await?;
            tracing::info!(node = %me, "Retrying deferred join");
            self.lock.with_lock(|| self.join_if_unclustered(&me)).await?;
        }
        self.healthcheck().await
    }

    /// Forget members the broker reports as stopped and drop their
    /// registrations. Returns the number of members reaped.
    pub async fn synchronize(&self) -> WarrenResult<usize> {
        let snapshot = self.status.current_snapshot().await?;
        let registered: BTreeSet<NodeName> = self.registry.list().await?.into_iter().collect();

        if snapshot.running() == registered || snapshot.stopped().is_empty() {
            tracing::debug!(members = registered.len(), "Registry in sync");
            self.update(|s| s.last_synchronize = Some(chrono::Utc::now().timestamp()))
                .await;
            return Ok(0);
        }

        let me = self.status.self_name().await?;
        self.update(|s| s.synchronizing = true).await;
        let result = self.lock.with_lock(|| self.reap_stopped(&me)).await;

        self.update(|s| {
            s.synchronizing = false;
            if let Ok(reaped) = &result {
                s.members_reaped += *reaped as u64;
                s.last_synchronize = Some(chrono::Utc::now().timestamp());
            }
        })
        .await;
        result
    }

    /// Must run under the lock. Re-reads the snapshot so a member another
    /// reconciler already reaped is not forgotten twice.
    async fn reap_stopped(&self, me: &NodeName) -> WarrenResult<usize> {
        let snapshot = self.status.current_snapshot().await?;

        let mut reaped = 0;
        for member in snapshot.stopped() {
            if member == *me {
                continue;
            }
            if let Err(e) = self.control.forget_member(&member).await {
                tracing::warn!(node = %member, error = %e, "Forget failed, keeping registration");
                continue;
            }
            self.registry.deregister(&member).await?;
            tracing::info!(node = %member, "Stopped member reaped");
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Bootstrap, then run the periodic passes until `shutdown` fires.
    ///
    /// Fatal errors end the loop; anything else is logged and retried on the
    /// next tick.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> WarrenResult<()> {
        tokio::select! {
            result = self.bootstrap() => result?,
            _ = shutdown.recv() => {
                tracing::info!("Shutdown during bootstrap");
                return Ok(());
            }
        }

        let mut healthcheck = tokio::time::interval(self.settings.healthcheck_interval);
        healthcheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut synchronize = tokio::time::interval(self.settings.synchronize_interval);
        synchronize.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Reconciler stopping");
                    return Ok(());
                }
                _ = healthcheck.tick() => {
                    if let Err(e) = self.maintain().await {
                        pass_failed("healthcheck", e)?;
                    }
                }
                _ = synchronize.tick() => {
                    if let Err(e) = self.synchronize().await {
                        pass_failed("synchronize", e)?;
                    }
                }
            }
        }
    }
}

fn pass_failed(pass: &str, e: WarrenError) -> WarrenResult<()> {
    if e.is_fatal() {
        tracing::error!(pass, error = %e, "Fatal error, stopping reconciler");
        return Err(e);
    }
    tracing::warn!(pass, error = %e, "Pass failed, retrying next tick");
    Ok(())
}

/// Lexicographically first registered peer other than `me`
fn select_join_target(peers: &[NodeName], me: &NodeName) -> Option<NodeName> {
    peers.iter().filter(|p| *p != me).min().cloned()
}
