//! Coordination-service adapters.
//!
//! The coordination service (Redis in production) is the single source of
//! truth shared by every reconciler in the fleet. This module exposes the
//! handful of primitives the reconciler needs behind [`CoordinationBackend`]
//! and builds three narrow services on top:
//! - [`LockService`] - fleet-wide mutual exclusion
//! - [`NodeRegistry`] - TTL-leased membership directory
//! - [`SecretStore`] - write-once cluster cookie

mod lock;
#[cfg(test)]
pub mod memory;
mod redis_backend;
mod registry;
mod secret;

use std::time::Duration;

use async_trait::async_trait;
use warren_common::constants::keys;
use warren_common::{NodeName, WarrenResult};

pub use lock::LockService;
pub use redis_backend::RedisBackend;
pub use registry::NodeRegistry;
pub use secret::SecretStore;

/// Primitives offered by the coordination service.
///
/// Every mutation must emit a change notification for its key so that a
/// [`KeyWatch`] opened by [`CoordinationBackend::watch`] wakes promptly.
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Current value, `None` when the key does not exist (or its lease expired)
    async fn get(&self, key: &str) -> WarrenResult<Option<String>>;

    /// Unconditional upsert. `ttl` replaces any previous lease; `None` removes it.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> WarrenResult<()>;

    /// Write only if the key is absent. Returns true when this call created it.
    async fn create(&self, key: &str, value: &str) -> WarrenResult<bool>;

    /// Atomically replace the value if it currently equals `expected`
    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str)
    -> WarrenResult<bool>;

    /// Live `(key, value)` pairs below `prefix`. Nothing there is an empty list.
    async fn list(&self, prefix: &str) -> WarrenResult<Vec<(String, String)>>;

    /// Remove the key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> WarrenResult<()>;

    /// Subscribe to changes of `key`. Changes made after this returns are
    /// not missed, even if they land before the first wait.
    async fn watch(&self, key: &str) -> WarrenResult<Box<dyn KeyWatch>>;
}

/// Open subscription to one key's change notifications
#[async_trait]
pub trait KeyWatch: Send {
    /// Wait until the key changes or `timeout` elapses, whichever comes first.
    /// An error means the subscription is dead and should be reopened.
    async fn changed(&mut self, timeout: Duration) -> WarrenResult<()>;
}

/// Key layout under one root
#[derive(Clone, Debug)]
pub struct Keyspace {
    root: String,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(keys::DEFAULT_ROOT)
    }
}

impl Keyspace {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    /// Directory holding one entry per registered node (trailing slash included)
    pub fn nodes_prefix(&self) -> String {
        format!("{}/{}/", self.root, keys::NODES_DIR)
    }

    pub fn node(&self, name: &NodeName) -> String {
        format!("{}{}", self.nodes_prefix(), name)
    }

    pub fn lock(&self) -> String {
        format!("{}/{}", self.root, keys::LOCK)
    }

    pub fn secret(&self) -> String {
        format!("{}/{}", self.root, keys::SECRET)
    }
}

/// Pub/sub channel carrying change notifications for `key`
pub fn watch_channel(key: &str) -> String {
    format!("{}{}", keys::WATCH_CHANNEL_PREFIX, key)
}
