//! Shared constants for Warren components.

/// Default Redis connection URL (the coordination service)
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default broker management API URL
pub const DEFAULT_MANAGEMENT_URL: &str = "http://127.0.0.1:15672";

/// Default status endpoint listen address
pub const DEFAULT_STATUS_ADDR: &str = "127.0.0.1:8889";

/// Default location of the broker's local cookie file
pub const DEFAULT_COOKIE_PATH: &str = "/var/lib/rabbitmq/.erlang.cookie";

/// Default owner of the installed cookie file
pub const DEFAULT_COOKIE_OWNER: &str = "rabbitmq:rabbitmq";

/// Vhost used by the management API aliveness test
pub const ALIVENESS_VHOST: &str = "aliveness-test";

/// Registration lease (seconds)
pub const NODE_TTL_SECS: u64 = 10;

/// Attempts before a coordination-service failure is surfaced
pub const BACKEND_RETRY_ATTEMPTS: u32 = 10;

/// Fixed delay between coordination-service retries (milliseconds)
pub const BACKEND_RETRY_DELAY_MS: u64 = 1000;

/// Upper bound on a single lock wait before the CAS is retried (milliseconds)
pub const LOCK_POLL_INTERVAL_MS: u64 = 1000;

/// Coordination-service key layout.
///
/// Everything lives under a single root (default `/cluster`):
/// - `{root}/nodes/{node_name}` - registration entry, value = node name, TTL lease
/// - `{root}/lock` - `"true"` / `"false"` mutual-exclusion flag
/// - `{root}/secret` - the cluster cookie, written once
pub mod keys {
    /// Default key root
    pub const DEFAULT_ROOT: &str = "/cluster";

    /// Registry directory below the root
    pub const NODES_DIR: &str = "nodes";

    /// Lock key below the root
    pub const LOCK: &str = "lock";

    /// Cookie key below the root
    pub const SECRET: &str = "secret";

    /// Lock flag value while held
    pub const LOCK_HELD: &str = "true";

    /// Lock flag value while free
    pub const LOCK_FREE: &str = "false";

    /// Pub/sub channel prefix for key change notifications
    pub const WATCH_CHANNEL_PREFIX: &str = "warren:watch:";
}
