//! Control plane backed by the `rabbitmqctl` CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use warren_common::{NodeName, WarrenError, WarrenResult};

use super::ClusterControlPlane;

/// Subset of `rabbitmqctl cluster_status --formatter json`
#[derive(Debug, Default, Deserialize)]
struct ClusterStatus {
    #[serde(default)]
    disk_nodes: Vec<String>,
    #[serde(default)]
    ram_nodes: Vec<String>,
}

impl ClusterStatus {
    fn size(&self) -> usize {
        self.disk_nodes.len() + self.ram_nodes.len()
    }
}

pub struct RabbitmqCtl {
    ctl_path: PathBuf,
    timeout: Duration,
}

impl RabbitmqCtl {
    pub fn new(ctl_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ctl_path: ctl_path.into(),
            timeout,
        }
    }

    /// Run one command and return its stdout
    async fn run(&self, args: &[&str]) -> WarrenResult<String> {
        tracing::debug!(ctl = %self.ctl_path.display(), ?args, "Running control command");

        let mut cmd = Command::new(&self.ctl_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                WarrenError::ControlPlane(format!(
                    "{} timed out after {:?}",
                    args.join(" "),
                    self.timeout
                ))
            })?
            .map_err(|e| {
                WarrenError::ControlPlane(format!(
                    "failed to spawn {}: {}",
                    self.ctl_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WarrenError::ControlPlane(format!(
                "{} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ClusterControlPlane for RabbitmqCtl {
    async fn local_cluster_size(&self) -> WarrenResult<usize> {
        let stdout = self.run(&["cluster_status", "--formatter", "json"]).await?;
        let status: ClusterStatus = serde_json::from_str(&stdout)
            .map_err(|e| WarrenError::ControlPlane(format!("unparseable cluster_status: {}", e)))?;
        Ok(status.size())
    }

    async fn stop_local(&self) -> WarrenResult<()> {
        self.run(&["stop_app"]).await.map(|_| ())
    }

    async fn start_local(&self) -> WarrenResult<()> {
        self.run(&["start_app"]).await.map(|_| ())
    }

    async fn join(&self, peer: &NodeName) -> WarrenResult<()> {
        self.run(&["join_cluster", peer.as_str()]).await?;
        tracing::info!(peer = %peer, "Joined cluster");
        Ok(())
    }

    async fn forget_member(&self, name: &NodeName) -> WarrenResult<()> {
        self.run(&["forget_cluster_node", name.as_str()]).await?;
        tracing::info!(node = %name, "Forgot cluster member");
        Ok(())
    }
}
