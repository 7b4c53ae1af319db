//! Site storage layout

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Named locks every site carries
pub const DEPLOYMENT_LOCK: &str = "deployment";
pub const STATUS_LOCK: &str = "status";
pub const HOOKS_LOCK: &str = "hooks";
pub const SSH_LOCK: &str = "ssh";

/// On-disk layout of one site, rooted at the site data directory
#[derive(Debug, Clone)]
pub struct SiteLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl SiteLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Deployment status records, one subdirectory per deployment id
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Marker touched when a deployment request was deferred
    pub fn pending_marker_file(&self) -> File {
        self.deployments_dir().file("pending")
    }

    /// Id of the deployment currently live on the site
    pub fn active_deployment_file(&self) -> File {
        self.deployments_dir().file("active")
    }

    /// Status record of one deployment
    pub fn deployment_status_file(&self, id: &str) -> File {
        self.deployments_dir().subdir(id).file("status.json")
    }

    /// Directory holding the named lock files
    pub fn locks_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("locks"))
    }

    /// Backing file of a named lock
    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().path().join(format!("{}.lock", name))
    }

    /// Marker present while an auto-swap is running
    pub fn auto_swap_marker_file(&self) -> File {
        self.locks_dir().file("autoswap.lock")
    }

    /// Source repository working tree
    pub fn repository_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("repository"))
    }

    /// Live site directory deployments are copied into
    pub fn wwwroot_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("wwwroot"))
    }

    /// Scratch space
    pub fn temp_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("temp"))
    }

    /// Liveness marker of background deployments
    pub fn pending_operation_file(&self) -> File {
        self.temp_dir().file("SCMPendingOperation.txt")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::AgentError> {
        self.deployments_dir().create().await?;
        self.locks_dir().create().await?;
        self.temp_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for SiteLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/home/site");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scm-agent");

        Self::new(base_dir)
    }
}
