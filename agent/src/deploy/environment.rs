//! Shared capabilities every deployment manager is built from

use std::sync::Arc;

use crate::deploy::deployer::Deployer;
use crate::deploy::fetch::FetchDeploymentManager;
use crate::deploy::notifier::PostDeploymentNotifier;
use crate::deploy::repository::RepositoryFactory;
use crate::errors::AgentError;
use crate::lock::LockRegistry;
use crate::storage::layout::SiteLayout;
use crate::storage::settings::Settings;
use crate::workers::liveness::PendingOperations;

/// Site-wide dependencies shared by foreground and background deployments
pub struct DeploymentEnvironment {
    pub layout: SiteLayout,
    pub settings: Settings,
    pub repository_factory: Arc<dyn RepositoryFactory>,
    pub deployer: Arc<dyn Deployer>,
    pub notifier: Arc<PostDeploymentNotifier>,
    pub pending_operations: PendingOperations,
}

impl DeploymentEnvironment {
    /// Open a new lock registry on this site's lock files
    pub fn open_locks(&self) -> Arc<LockRegistry> {
        Arc::new(LockRegistry::open(
            &self.layout,
            &self.settings,
            Arc::clone(&self.repository_factory),
        ))
    }

    /// A manager with its own lock handles and status manager.
    ///
    /// It coordinates with every other manager on the site through the
    /// shared lock files.
    pub async fn build_manager(self: &Arc<Self>) -> Result<FetchDeploymentManager, AgentError> {
        FetchDeploymentManager::open(Arc::clone(self), self.open_locks()).await
    }
}
