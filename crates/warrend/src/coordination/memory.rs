//! In-process coordination backend for tests.
//!
//! Leases are measured on the tokio clock, so paused-time tests can step
//! past a TTL window with `tokio::time::advance`. Watches are not scoped to a
//! key: any write wakes every subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use warren_common::{WarrenError, WarrenResult};

use super::{CoordinationBackend, KeyWatch};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    /// Bumped on every write
    changes: watch::Sender<u64>,
    /// Number of upcoming calls that fail with a transient error
    failures: AtomicU32,
    subscriptions: AtomicU32,
    /// Write operations performed, as `"op key"`
    writes: Arc<Mutex<Vec<String>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            entries: Mutex::default(),
            changes: watch::channel(0).0,
            failures: AtomicU32::default(),
            subscriptions: AtomicU32::default(),
            writes: Arc::default(),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log writes into a journal shared with other test doubles
    pub fn with_journal(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            writes: journal,
            ..Self::default()
        }
    }

    /// Make the next `n` calls fail with `WarrenError::Backend`
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Write log, oldest first
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Watches opened so far
    pub fn subscriptions(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Raw read that bypasses failure injection
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    fn check_failure(&self) -> WarrenResult<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(WarrenError::Backend("injected failure".into()));
        }
        Ok(())
    }

    fn record(&self, op: &str, key: &str) {
        self.writes.lock().unwrap().push(format!("{} {}", op, key));
        self.changes.send_modify(|version| *version += 1);
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CoordinationBackend for MemoryBackend {
    async fn get(&self, key: &str) -> WarrenResult<Option<String>> {
        self.check_failure()?;
        let mut entries = self.entries.lock().unwrap();
        Ok(Self::live_value(&mut entries, key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> WarrenResult<()> {
        self.check_failure()?;
        {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }
        self.record("set", key);
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> WarrenResult<bool> {
        self.check_failure()?;
        {
            let mut entries = self.entries.lock().unwrap();
            if Self::live_value(&mut entries, key).is_some() {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        }
        self.record("create", key);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> WarrenResult<bool> {
        self.check_failure()?;
        {
            let mut entries = self.entries.lock().unwrap();
            if Self::live_value(&mut entries, key).as_deref() != Some(expected) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        }
        self.record("cas", key);
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> WarrenResult<Vec<(String, String)>> {
        self.check_failure()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| e.is_live(now));

        let mut found: Vec<_> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        found.sort();
        Ok(found)
    }

    async fn delete(&self, key: &str) -> WarrenResult<()> {
        self.check_failure()?;
        self.entries.lock().unwrap().remove(key);
        self.record("delete", key);
        Ok(())
    }

    async fn watch(&self, _key: &str) -> WarrenResult<Box<dyn KeyWatch>> {
        self.check_failure()?;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWatch {
            rx: self.changes.subscribe(),
        }))
    }
}

struct MemoryWatch {
    rx: watch::Receiver<u64>,
}

#[async_trait]
impl KeyWatch for MemoryWatch {
    async fn changed(&mut self, timeout: Duration) -> WarrenResult<()> {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Ok(Err(_)) => Err(WarrenError::Backend("memory backend dropped".into())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_on_tokio_clock() {
        let backend = MemoryBackend::new();
        backend
            .set("/k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(backend.get("/k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.get("/k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap_requires_expected_value() {
        let backend = MemoryBackend::new();
        assert!(!backend.compare_and_swap("/lock", "false", "true").await.unwrap());

        assert!(backend.create("/lock", "false").await.unwrap());
        assert!(!backend.create("/lock", "other").await.unwrap());
        assert!(backend.compare_and_swap("/lock", "false", "true").await.unwrap());
        assert!(!backend.compare_and_swap("/lock", "false", "true").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_before_wait_is_not_missed() {
        let backend = MemoryBackend::new();
        let mut watch = backend.watch("/k").await.unwrap();

        backend.set("/k", "v", None).await.unwrap();

        let started = Instant::now();
        watch.changed(Duration::from_secs(60)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));

        // Consumed; the next wait runs to its timeout
        watch.changed(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
