//! Configuration management for warrend.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use warren_common::constants::{
    ALIVENESS_VHOST, BACKEND_RETRY_ATTEMPTS, BACKEND_RETRY_DELAY_MS, DEFAULT_COOKIE_OWNER,
    DEFAULT_COOKIE_PATH, DEFAULT_MANAGEMENT_URL, DEFAULT_REDIS_URL, DEFAULT_STATUS_ADDR,
    LOCK_POLL_INTERVAL_MS, NODE_TTL_SECS, keys,
};

use crate::cluster::ManagementConfig;
use crate::reconciler::ReconcilerSettings;
use crate::retry::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[serde(default)]
    pub management: ManagementSection,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub secret: SecretConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub status: StatusConfig,
}

/// Coordination service (Redis) settings
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Root under which the lock, secret and registry keys live
    #[serde(default = "default_key_root")]
    pub key_root: String,

    /// Registration lease in seconds
    #[serde(default = "default_node_ttl")]
    pub node_ttl_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Longest a lock waiter sleeps without a change notification
    #[serde(default = "default_lock_poll")]
    pub lock_poll_interval_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key_root: default_key_root(),
            node_ttl_secs: default_node_ttl(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            lock_poll_interval_ms: default_lock_poll(),
        }
    }
}

/// Broker management API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ManagementSection {
    #[serde(default = "default_management_url")]
    pub url: String,

    #[serde(default = "default_guest")]
    pub username: String,

    #[serde(default = "default_guest")]
    pub password: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_aliveness_vhost")]
    pub aliveness_vhost: String,
}

impl Default for ManagementSection {
    fn default() -> Self {
        Self {
            url: default_management_url(),
            username: default_guest(),
            password: default_guest(),
            timeout_secs: default_request_timeout(),
            aliveness_vhost: default_aliveness_vhost(),
        }
    }
}

/// `rabbitmqctl` settings
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_ctl_path")]
    pub ctl_path: String,

    #[serde(default = "default_ctl_timeout")]
    pub timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            ctl_path: default_ctl_path(),
            timeout_secs: default_ctl_timeout(),
        }
    }
}

/// Local cookie installation
#[derive(Debug, Clone, Deserialize)]
pub struct SecretConfig {
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,

    /// `user:group` for the installed file; empty skips `chown`
    #[serde(default = "default_cookie_owner")]
    pub owner: String,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            cookie_path: default_cookie_path(),
            owner: default_cookie_owner(),
        }
    }
}

/// Aliveness wait during bootstrap
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_alive_initial_delay")]
    pub alive_initial_delay_ms: u64,

    #[serde(default = "default_alive_max_delay")]
    pub alive_max_delay_secs: u64,

    #[serde(default = "default_max_alive_attempts")]
    pub max_alive_attempts: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            alive_initial_delay_ms: default_alive_initial_delay(),
            alive_max_delay_secs: default_alive_max_delay(),
            max_alive_attempts: default_max_alive_attempts(),
        }
    }
}

/// Periodic pass intervals
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_healthcheck_interval")]
    pub healthcheck_interval_secs: u64,

    #[serde(default = "default_synchronize_interval")]
    pub synchronize_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            healthcheck_interval_secs: default_healthcheck_interval(),
            synchronize_interval_secs: default_synchronize_interval(),
        }
    }
}

/// Status HTTP endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_status_addr")]
    pub listen_addr: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_status_addr(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_key_root() -> String { keys::DEFAULT_ROOT.to_string() }
fn default_node_ttl() -> u64 { NODE_TTL_SECS }
fn default_retry_attempts() -> u32 { BACKEND_RETRY_ATTEMPTS }
fn default_retry_delay() -> u64 { BACKEND_RETRY_DELAY_MS }
fn default_lock_poll() -> u64 { LOCK_POLL_INTERVAL_MS }
fn default_management_url() -> String { DEFAULT_MANAGEMENT_URL.to_string() }
fn default_guest() -> String { "guest".to_string() }
fn default_request_timeout() -> u64 { 5 }
fn default_aliveness_vhost() -> String { ALIVENESS_VHOST.to_string() }
fn default_ctl_path() -> String { "rabbitmqctl".to_string() }
fn default_ctl_timeout() -> u64 { 60 }
fn default_cookie_path() -> String { DEFAULT_COOKIE_PATH.to_string() }
fn default_cookie_owner() -> String { DEFAULT_COOKIE_OWNER.to_string() }
fn default_alive_initial_delay() -> u64 { 1000 }
fn default_alive_max_delay() -> u64 { 64 }
fn default_max_alive_attempts() -> u32 { 16 }
fn default_healthcheck_interval() -> u64 { 5 }
fn default_synchronize_interval() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_status_addr() -> String { DEFAULT_STATUS_ADDR.to_string() }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = Self::from_file(config_path)?;

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.coordination.redis_url = redis_url.clone();
        }
        if let Some(ref management_url) = args.management_url {
            config.management.url = management_url.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(config_path: &str) -> Result<Self> {
        if !Path::new(config_path).exists() {
            // Use defaults if config file doesn't exist
            tracing::warn!(path = config_path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
            .context("Failed to load config file")?;

        settings.try_deserialize().context("Failed to parse config")
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.coordination.node_ttl_secs > 0, "coordination.node_ttl_secs must be positive");
        anyhow::ensure!(
            self.coordination.lock_poll_interval_ms > 0,
            "coordination.lock_poll_interval_ms must be positive"
        );
        anyhow::ensure!(
            self.reconcile.healthcheck_interval_secs > 0 && self.reconcile.synchronize_interval_secs > 0,
            "reconcile intervals must be positive"
        );
        // A refresh slower than the lease lets a healthy node drop out of the registry
        if self.reconcile.healthcheck_interval_secs >= self.coordination.node_ttl_secs {
            tracing::warn!(
                interval = self.reconcile.healthcheck_interval_secs,
                ttl = self.coordination.node_ttl_secs,
                "Healthcheck interval is not shorter than the registration lease"
            );
        }
        Ok(())
    }

    pub fn node_ttl(&self) -> Duration {
        Duration::from_secs(self.coordination.node_ttl_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.coordination.lock_poll_interval_ms)
    }

    /// Policy for every coordination-service call
    pub fn backend_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.coordination.retry_attempts,
            Duration::from_millis(self.coordination.retry_delay_ms),
        )
    }

    pub fn management_config(&self) -> ManagementConfig {
        ManagementConfig {
            url: self.management.url.clone(),
            username: self.management.username.clone(),
            password: self.management.password.clone(),
            timeout: Duration::from_secs(self.management.timeout_secs),
            aliveness_vhost: self.management.aliveness_vhost.clone(),
        }
    }

    pub fn cookie_owner(&self) -> Option<String> {
        Some(self.secret.owner.clone()).filter(|o| !o.is_empty())
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            alive_wait: RetryPolicy::exponential(
                self.bootstrap.max_alive_attempts,
                Duration::from_millis(self.bootstrap.alive_initial_delay_ms),
                Duration::from_secs(self.bootstrap.alive_max_delay_secs),
            ),
            healthcheck_interval: Duration::from_secs(self.reconcile.healthcheck_interval_secs),
            synchronize_interval: Duration::from_secs(self.reconcile.synchronize_interval_secs),
        }
    }
}
