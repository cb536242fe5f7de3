//! Installs the cluster cookie where the local broker reads it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use warren_common::{ClusterCookie, WarrenError, WarrenResult};

use super::LocalSecretInstaller;

/// Owner read-only
#[cfg(unix)]
const COOKIE_MODE: u32 = 0o400;

pub struct FileSecretInstaller {
    path: PathBuf,
    /// `user:group` handed to `chown`, if any
    owner: Option<String>,
}

impl FileSecretInstaller {
    pub fn new(path: impl Into<PathBuf>, owner: Option<String>) -> Self {
        Self {
            path: path.into(),
            owner,
        }
    }

    fn staging_path(&self) -> WarrenResult<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                WarrenError::SecretInstall(format!("{} is not a file path", self.path.display()))
            })?
            .to_string_lossy();
        Ok(self.path.with_file_name(format!("{}.warren-tmp", file_name)))
    }

    async fn chown(&self, owner: &str, path: &Path) -> WarrenResult<()> {
        let status = Command::new("chown")
            .arg(owner)
            .arg(path)
            .status()
            .await
            .map_err(|e| install_err("chown", path, e))?;

        if !status.success() {
            return Err(WarrenError::SecretInstall(format!(
                "chown {} {} exited with {}",
                owner,
                path.display(),
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalSecretInstaller for FileSecretInstaller {
    async fn install(&self, cookie: &ClusterCookie) -> WarrenResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| install_err("create directory", dir, e))?;
        }

        // Write beside the target and rename, so the broker never reads a
        // partial cookie. A leftover staging file from a crashed run may be
        // read-only, so clear it first.
        let staging = self.staging_path()?;
        match tokio::fs::remove_file(&staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(install_err("remove stale", &staging, e)),
        }

        tokio::fs::write(&staging, cookie.expose())
            .await
            .map_err(|e| install_err("write", &staging, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staging, std::fs::Permissions::from_mode(COOKIE_MODE))
                .await
                .map_err(|e| install_err("chmod", &staging, e))?;
        }

        if let Some(owner) = &self.owner {
            self.chown(owner, &staging).await?;
        }

        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| install_err("rename", &self.path, e))?;

        tracing::info!(
            path = %self.path.display(),
            fingerprint = %cookie.fingerprint(),
            "Cluster cookie installed"
        );
        Ok(())
    }
}

fn install_err(action: &str, path: &Path, e: std::io::Error) -> WarrenError {
    WarrenError::SecretInstall(format!("{} {}: {}", action, path.display(), e))
}
