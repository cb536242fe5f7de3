//! In-memory doubles for the broker collaborators.
//!
//! Every double writes to a shared journal so tests can assert the order of
//! calls across the control plane, the status provider and the backend.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use warren_common::{ClusterCookie, ClusterSnapshot, NodeName, WarrenError, WarrenResult};

use crate::cluster::{ClusterControlPlane, ClusterStatusProvider, LocalSecretInstaller};
use crate::coordination::memory::MemoryBackend;
use crate::coordination::{Keyspace, LockService, NodeRegistry, SecretStore};
use crate::reconciler::{ClusterReconciler, ReconcilerSettings};
use crate::retry::RetryPolicy;

pub type Journal = Arc<Mutex<Vec<String>>>;

fn log(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

pub struct FakeControlPlane {
    journal: Journal,
    cluster_size: AtomicUsize,
    fail_join: AtomicBool,
    fail_forget: Mutex<HashSet<NodeName>>,
}

impl FakeControlPlane {
    pub fn new(journal: Journal, cluster_size: usize) -> Self {
        Self {
            journal,
            cluster_size: AtomicUsize::new(cluster_size),
            fail_join: AtomicBool::new(false),
            fail_forget: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn fail_forget(&self, name: &str) {
        self.fail_forget.lock().unwrap().insert(NodeName::from(name));
    }
}

#[async_trait]
impl ClusterControlPlane for FakeControlPlane {
    async fn local_cluster_size(&self) -> WarrenResult<usize> {
        log(&self.journal, "cluster_size");
        Ok(self.cluster_size.load(Ordering::SeqCst))
    }

    async fn stop_local(&self) -> WarrenResult<()> {
        log(&self.journal, "stop_local");
        Ok(())
    }

    async fn start_local(&self) -> WarrenResult<()> {
        log(&self.journal, "start_local");
        Ok(())
    }

    async fn join(&self, peer: &NodeName) -> WarrenResult<()> {
        log(&self.journal, format!("join {}", peer));
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(WarrenError::ControlPlane("join_cluster exited with 69".into()));
        }
        self.cluster_size.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn forget_member(&self, name: &NodeName) -> WarrenResult<()> {
        log(&self.journal, format!("forget {}", name));
        if self.fail_forget.lock().unwrap().contains(name) {
            return Err(WarrenError::ControlPlane("forget_cluster_node exited with 70".into()));
        }
        Ok(())
    }
}

pub struct FakeStatus {
    journal: Journal,
    name: NodeName,
    /// Scripted aliveness answers, consumed in order
    alive_script: Mutex<VecDeque<bool>>,
    /// Answer once the script runs out
    alive_default: AtomicBool,
    snapshot: Mutex<ClusterSnapshot>,
}

impl FakeStatus {
    pub fn new(journal: Journal, name: &str) -> Self {
        Self {
            journal,
            name: NodeName::from(name),
            alive_script: Mutex::new(VecDeque::new()),
            alive_default: AtomicBool::new(true),
            snapshot: Mutex::new(ClusterSnapshot::default()),
        }
    }

    pub fn script_alive(&self, answers: &[bool]) {
        self.alive_script.lock().unwrap().extend(answers);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive_default.store(alive, Ordering::SeqCst);
    }

    pub fn set_snapshot(&self, snapshot: ClusterSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

#[async_trait]
impl ClusterStatusProvider for FakeStatus {
    async fn is_alive(&self) -> bool {
        let scripted = self.alive_script.lock().unwrap().pop_front();
        let alive = scripted.unwrap_or_else(|| self.alive_default.load(Ordering::SeqCst));
        log(&self.journal, format!("is_alive {}", alive));
        alive
    }

    async fn current_snapshot(&self) -> WarrenResult<ClusterSnapshot> {
        log(&self.journal, "snapshot");
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn self_name(&self) -> WarrenResult<NodeName> {
        Ok(self.name.clone())
    }
}

#[derive(Default)]
pub struct FakeInstaller {
    pub installed: Mutex<Vec<ClusterCookie>>,
}

#[async_trait]
impl LocalSecretInstaller for FakeInstaller {
    async fn install(&self, cookie: &ClusterCookie) -> WarrenResult<()> {
        self.installed.lock().unwrap().push(cookie.clone());
        Ok(())
    }
}

/// A reconciler wired to in-memory doubles
pub struct Harness {
    pub journal: Journal,
    pub backend: Arc<MemoryBackend>,
    pub control: Arc<FakeControlPlane>,
    pub status: Arc<FakeStatus>,
    pub installer: Arc<FakeInstaller>,
    pub registry: NodeRegistry,
    pub secrets: SecretStore,
    pub reconciler: ClusterReconciler,
}

impl Harness {
    pub fn new(self_name: &str, cluster_size: usize) -> Self {
        Self::with_settings(self_name, cluster_size, ReconcilerSettings::default())
    }

    pub fn with_settings(self_name: &str, cluster_size: usize, settings: ReconcilerSettings) -> Self {
        let journal: Journal = Arc::default();
        let backend = Arc::new(MemoryBackend::with_journal(journal.clone()));
        let control = Arc::new(FakeControlPlane::new(journal.clone(), cluster_size));
        let status = Arc::new(FakeStatus::new(journal.clone(), self_name));
        let installer = Arc::new(FakeInstaller::default());

        let keyspace = Keyspace::default();
        let retry = RetryPolicy::fixed(10, Duration::from_millis(1));
        let registry = || {
            NodeRegistry::new(
                backend.clone(),
                keyspace.clone(),
                Duration::from_secs(10),
                retry.clone(),
            )
        };
        let secrets = || SecretStore::new(backend.clone(), &keyspace, retry.clone());

        let reconciler = ClusterReconciler::new(
            LockService::new(
                backend.clone(),
                &keyspace,
                retry.clone(),
                Duration::from_millis(100),
            ),
            registry(),
            secrets(),
            control.clone(),
            status.clone(),
            installer.clone(),
        )
        .with_settings(settings);
        let registry = registry();
        let secrets = secrets();

        Self {
            journal,
            backend,
            control,
            status,
            installer,
            registry,
            secrets,
            reconciler,
        }
    }

    /// Journal entries excluding lock traffic
    pub fn calls(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.ends_with("/cluster/lock"))
            .cloned()
            .collect()
    }

    /// Number of times the lock was won
    pub fn lock_acquisitions(&self) -> usize {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == "cas /cluster/lock")
            .count()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }
}
