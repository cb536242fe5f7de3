//! Status provider backed by the broker's HTTP management API.
//!
//! The aliveness test needs a dedicated vhost the management user may
//! publish to, so `is_alive` sets both up on first use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use warren_common::{ClusterSnapshot, NodeName, WarrenError, WarrenResult};

use super::ClusterStatusProvider;

/// Connection settings for the management API
#[derive(Clone, Debug)]
pub struct ManagementConfig {
    /// Base URL, e.g. `http://127.0.0.1:15672`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Vhost used for the aliveness test
    pub aliveness_vhost: String,
}

#[derive(Debug, Deserialize)]
struct Overview {
    node: String,
}

#[derive(Debug, Deserialize)]
struct Vhost {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserPermission {
    vhost: String,
}

#[derive(Debug, Serialize)]
struct PermissionGrant<'a> {
    configure: &'a str,
    write: &'a str,
    read: &'a str,
}

#[derive(Debug, Deserialize)]
struct AlivenessResponse {
    status: String,
}

pub struct ManagementApi {
    base: Url,
    client: Client,
    config: ManagementConfig,
    /// Node name, cached so it survives the API going away later
    name: OnceCell<NodeName>,
}

impl ManagementApi {
    pub fn new(config: ManagementConfig) -> WarrenResult<Self> {
        let base = Url::parse(&config.url).map_err(|e| {
            WarrenError::Config(format!("invalid management URL {}: {}", config.url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(WarrenError::Config(format!(
                "management URL {} cannot be a base",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WarrenError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base,
            client,
            config,
            name: OnceCell::new(),
        })
    }

    /// `{base}/api/{segments...}`, each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> WarrenResult<T> {
        self.client
            .get(self.url(segments))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?
            .json()
            .await
            .map_err(http_err)
    }

    async fn put_json<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> WarrenResult<()> {
        self.client
            .put(self.url(segments))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        Ok(())
    }

    async fn ensure_aliveness_vhost(&self) -> WarrenResult<()> {
        let vhost = self.config.aliveness_vhost.as_str();

        let vhosts: Vec<Vhost> = self.get_json(&["vhosts"]).await?;
        if !vhosts.iter().any(|v| v.name == vhost) {
            tracing::info!(vhost, "Creating aliveness vhost");
            self.put_json(&["vhosts", vhost], &serde_json::json!({})).await?;
        }

        let user = self.config.username.as_str();
        let permissions: Vec<UserPermission> =
            self.get_json(&["users", user, "permissions"]).await?;
        if !permissions.iter().any(|p| p.vhost == vhost) {
            tracing::info!(vhost, user, "Granting aliveness vhost permissions");
            let grant = PermissionGrant {
                configure: ".*",
                write: ".*",
                read: ".*",
            };
            self.put_json(&["permissions", vhost, user], &grant).await?;
        }

        Ok(())
    }

    async fn check_aliveness(&self) -> WarrenResult<bool> {
        self.ensure_aliveness_vhost().await?;
        let response: AlivenessResponse = self
            .get_json(&["aliveness-test", self.config.aliveness_vhost.as_str()])
            .await?;
        Ok(response.status == "ok")
    }
}

#[async_trait]
impl ClusterStatusProvider for ManagementApi {
    async fn is_alive(&self) -> bool {
        match self.check_aliveness().await {
            Ok(alive) => alive,
            Err(e) => {
                tracing::debug!(error = %e, "Aliveness test failed");
                false
            }
        }
    }

    async fn current_snapshot(&self) -> WarrenResult<ClusterSnapshot> {
        self.get_json(&["nodes"]).await
    }

    async fn self_name(&self) -> WarrenResult<NodeName> {
        self.name
            .get_or_try_init(|| async {
                let overview: Overview = self.get_json(&["overview"]).await?;
                tracing::info!(node = %overview.node, "Resolved local node name");
                Ok::<_, WarrenError>(NodeName::from(overview.node))
            })
            .await
            .cloned()
    }
}

fn http_err(e: reqwest::Error) -> WarrenError {
    if e.is_timeout() {
        WarrenError::Timeout(e.to_string())
    } else {
        WarrenError::Status(e.to_string())
    }
}
