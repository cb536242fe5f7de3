//! Core types shared across Warren components.

use std::collections::BTreeSet;
use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of one broker instance (e.g. `rabbit@node1`).
///
/// Used both as the registry key suffix and as the peer argument for
/// control-plane commands.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Shared secret every broker presents to its peers.
///
/// The value never appears in `Debug` output; only a fingerprint does.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterCookie(String);

impl ClusterCookie {
    /// Length of cookies produced by [`ClusterCookie::generate`]
    pub const GENERATED_LEN: usize = 20;

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random cookie (uppercase ASCII letters)
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let value = (0..Self::GENERATED_LEN)
            .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
            .collect();
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut encoded = URL_SAFE_NO_PAD.encode(digest);
        encoded.truncate(12);
        encoded
    }
}

impl fmt::Debug for ClusterCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClusterCookie").field(&self.fingerprint()).finish()
    }
}

/// One member as the broker's own clustering layer sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub name: NodeName,
    pub running: bool,
}

impl ClusterMember {
    pub fn new(name: impl Into<NodeName>, running: bool) -> Self {
        Self {
            name: name.into(),
            running,
        }
    }
}

/// Transient view of the actual cluster membership. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSnapshot {
    pub members: Vec<ClusterMember>,
}

impl ClusterSnapshot {
    pub fn new(members: Vec<ClusterMember>) -> Self {
        Self { members }
    }

    /// Names of members currently running
    pub fn running(&self) -> BTreeSet<NodeName> {
        self.members
            .iter()
            .filter(|m| m.running)
            .map(|m| m.name.clone())
            .collect()
    }

    /// Members known to the cluster but not running, in snapshot order
    pub fn stopped(&self) -> Vec<NodeName> {
        self.members
            .iter()
            .filter(|m| !m.running)
            .map(|m| m.name.clone())
            .collect()
    }
}

/// Reconciler state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilerState {
    /// Cookie not yet verified and installed
    Unbootstrapped,
    /// Deciding whether to join a peer and issuing the join
    Joining,
    /// Waiting for the local broker to pass the aliveness test
    AwaitingAliveness,
    /// Registered in the node registry; periodic passes run from here
    Registered,
}

impl Default for ReconcilerState {
    fn default() -> Self {
        Self::Unbootstrapped
    }
}

impl fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unbootstrapped => "unbootstrapped",
            Self::Joining => "joining",
            Self::AwaitingAliveness => "awaiting_aliveness",
            Self::Registered => "registered",
        };
        f.write_str(s)
    }
}

/// Operator-facing summary of one reconciler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilerStatus {
    /// Local node name, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeName>,

    pub state: ReconcilerState,

    /// A synchronize pass is in progress
    pub synchronizing: bool,

    /// Last join attempt failed and will be retried
    pub join_pending: bool,

    /// Last successful healthcheck refresh (Unix epoch seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_healthcheck: Option<i64>,

    /// Last completed synchronize pass (Unix epoch seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synchronize: Option<i64>,

    /// Members forgotten by this reconciler since start
    pub members_reaped: u64,
}
