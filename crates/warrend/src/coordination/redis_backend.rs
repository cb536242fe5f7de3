//! Redis-backed coordination service.
//!
//! - `create` is `SET NX`
//! - leases are `SET .. EX`
//! - compare-and-swap runs as a Lua script so the read and the write are atomic
//! - change notifications are published on `warren:watch:{key}`

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use warren_common::{WarrenError, WarrenResult};

use super::{CoordinationBackend, KeyWatch, watch_channel};

/// Swap KEYS[1] from ARGV[1] to ARGV[2] and notify ARGV[3]. Returns 1 on swap.
const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    redis.call('PUBLISH', ARGV[3], 'cas')
    return 1
end
return 0
";

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 100;

pub struct RedisBackend {
    /// Used to open a dedicated pub/sub connection per `watch`
    client: redis::Client,
    /// Multiplexed command connection (auto-reconnecting)
    conn: ConnectionManager,
    cas: Script,
}

impl RedisBackend {
    /// Connect to the coordination service
    pub async fn connect(url: &str) -> WarrenResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| WarrenError::Config(format!("invalid Redis URL {}: {}", url, e)))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(backend_err)?;

        Ok(Self {
            client,
            conn,
            cas: Script::new(CAS_SCRIPT),
        })
    }

    /// Round-trip check used by the status endpoint
    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        result.is_ok()
    }

    async fn scan_keys(&self, pattern: &str) -> WarrenResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;

            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        Ok(found)
    }
}

#[async_trait]
impl CoordinationBackend for RedisBackend {
    async fn get(&self, key: &str) -> WarrenResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(backend_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> WarrenResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        match ttl {
            // EX takes whole seconds and rejects zero
            Some(ttl) => pipe.set_ex(key, value, ttl.as_secs().max(1)).ignore(),
            None => pipe.set(key, value).ignore(),
        };
        pipe.publish(watch_channel(key), "set").ignore();

        let _: () = pipe.query_async(&mut conn).await.map_err(backend_err)?;
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> WarrenResult<bool> {
        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(key, value).await.map_err(backend_err)?;

        if created {
            let _: () = conn
                .publish(watch_channel(key), "create")
                .await
                .map_err(backend_err)?;
        }

        Ok(created)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> WarrenResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.cas.prepare_invoke();
        invocation
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(watch_channel(key));

        let swapped: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(swapped == 1)
    }

    async fn list(&self, prefix: &str) -> WarrenResult<Vec<(String, String)>> {
        let keys = self.scan_keys(&format!("{}*", escape_glob(prefix))).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Entries can expire between SCAN and MGET; those come back as nil
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    async fn delete(&self, key: &str) -> WarrenResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .publish(watch_channel(key), "delete")
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn watch(&self, key: &str) -> WarrenResult<Box<dyn KeyWatch>> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(backend_err)?;
        pubsub
            .subscribe(watch_channel(key))
            .await
            .map_err(backend_err)?;

        Ok(Box::new(RedisWatch {
            key: key.to_string(),
            pubsub,
        }))
    }
}

/// Subscription on `warren:watch:{key}`. Messages published while nobody is
/// waiting queue on the connection and wake the next wait.
struct RedisWatch {
    key: String,
    pubsub: redis::aio::PubSub,
}

#[async_trait]
impl KeyWatch for RedisWatch {
    async fn changed(&mut self, timeout: Duration) -> WarrenResult<()> {
        let mut messages = std::pin::pin!(self.pubsub.on_message());
        match tokio::time::timeout(timeout, messages.next()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(WarrenError::Backend(format!(
                "subscription on {} closed",
                self.key
            ))),
            Err(_) => {
                tracing::trace!(key = %self.key, "Watch timed out without a change");
                Ok(())
            }
        }
    }
}

fn backend_err(e: RedisError) -> WarrenError {
    if e.is_timeout() {
        WarrenError::Timeout(e.to_string())
    } else if e.kind() == ErrorKind::TypeError {
        WarrenError::Internal(format!("unexpected value in coordination service: {}", e))
    } else {
        WarrenError::Backend(e.to_string())
    }
}

/// Escape Redis glob metacharacters so a key prefix matches literally
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
