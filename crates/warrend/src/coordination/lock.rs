//! Fleet-wide mutual exclusion on a single boolean key.
//!
//! Acquisition is a compare-and-swap from `"false"` to `"true"`. A reconciler
//! that loses the swap subscribes to the key once, swaps again, then waits for
//! change notifications (bounded by the poll interval) between attempts.
//! The flag is recreated before every attempt, so a flushed or failed-over
//! coordination service does not strand waiters.
//! Contention is never counted against the retry policy; only backend errors
//! are.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use warren_common::constants::keys::{LOCK_FREE, LOCK_HELD};
use warren_common::{WarrenError, WarrenResult};

use super::{CoordinationBackend, KeyWatch, Keyspace};
use crate::retry::RetryPolicy;

pub struct LockService {
    backend: Arc<dyn CoordinationBackend>,
    key: String,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl LockService {
    pub fn new(
        backend: Arc<dyn CoordinationBackend>,
        keyspace: &Keyspace,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            key: keyspace.lock(),
            retry,
            poll_interval,
        }
    }

    /// Block until this reconciler holds the lock.
    ///
    /// The returned guard must be released with [`LockGuard::release`].
    pub async fn acquire(&self) -> WarrenResult<LockGuard> {
        let mut changes: Option<Box<dyn KeyWatch>> = None;
        let mut waits: u64 = 0;
        loop {
            // Losing this race is fine; it only matters when the key is absent
            self.retry
                .run("lock.init", || self.backend.create(&self.key, LOCK_FREE))
                .await?;

            let acquired = self
                .retry
                .run("lock.acquire", || {
                    self.backend
                        .compare_and_swap(&self.key, LOCK_FREE, LOCK_HELD)
                })
                .await?;

            if acquired {
                tracing::debug!(key = %self.key, waits, "Cluster lock acquired");
                return Ok(LockGuard {
                    backend: self.backend.clone(),
                    key: self.key.clone(),
                    retry: self.retry.clone(),
                    released: false,
                });
            }

            let Some(watch) = changes.as_mut() else {
                if waits == 0 {
                    tracing::info!(key = %self.key, "Cluster lock held elsewhere, waiting");
                }
                changes = Some(
                    self.retry
                        .run("lock.watch", || self.backend.watch(&self.key))
                        .await?,
                );
                // Swap again: a release that landed before the subscription
                // produced no notification for us
                continue;
            };
            waits += 1;

            let result = watch.changed(self.poll_interval).await;
            if let Err(e) = result {
                tracing::warn!(key = %self.key, error = %e, "Lock watch lost, resubscribing");
                changes = None;
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Run `f` while holding the lock, releasing it on every exit path.
    ///
    /// A failed release is fatal and wins over the closure's own result.
    pub async fn with_lock<T, F, Fut>(&self, f: F) -> WarrenResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WarrenResult<T>>,
    {
        let guard = self.acquire().await?;
        let result = f().await;

        match (result, guard.release().await) {
            (result, Ok(())) => result,
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(e), Err(release_err)) => {
                tracing::error!(error = %e, "Locked section failed before the lock release failed");
                Err(release_err)
            }
        }
    }

    /// Clear the flag regardless of who holds it (operator recovery after a
    /// holder crashed mid-section)
    pub async fn force_release(&self) -> WarrenResult<()> {
        self.retry
            .run("lock.force_release", || {
                self.backend.set(&self.key, LOCK_FREE, None)
            })
            .await?;
        tracing::warn!(key = %self.key, "Cluster lock forcibly released");
        Ok(())
    }
}

/// Proof of holding the cluster lock.
///
/// Dropping an unreleased guard (cancellation, panic) schedules a background
/// release on the current runtime.
#[must_use = "the cluster lock stays held until the guard is released"]
pub struct LockGuard {
    backend: Arc<dyn CoordinationBackend>,
    key: String,
    retry: RetryPolicy,
    released: bool,
}

impl LockGuard {
    /// Give the lock back
    pub async fn release(mut self) -> WarrenResult<()> {
        self.released = true;
        self.retry
            .run("lock.release", || self.backend.set(&self.key, LOCK_FREE, None))
            .await
            .map_err(|e| WarrenError::LockRelease(e.to_string()))?;

        tracing::debug!(key = %self.key, "Cluster lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(key = %self.key, "Lock guard dropped outside a runtime; lock stays held");
            return;
        };

        tracing::warn!(key = %self.key, "Lock guard dropped unreleased, releasing in background");
        let backend = self.backend.clone();
        let key = self.key.clone();
        let retry = self.retry.clone();
        handle.spawn(async move {
            if let Err(e) = retry
                .run("lock.release", || backend.set(&key, LOCK_FREE, None))
                .await
            {
                tracing::error!(key = %key, error = %e, "Background lock release failed");
            }
        });
    }
}
