//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::deployer::Deployer;
use crate::deploy::environment::DeploymentEnvironment;
use crate::deploy::fetch::FetchDeploymentManager;
use crate::deploy::git::GitRepositoryFactory;
use crate::deploy::notifier::PostDeploymentNotifier;
use crate::deploy::repository::RepositoryFactory;
use crate::deploy::script::ScriptDeployer;
use crate::errors::AgentError;
use crate::storage::layout::SiteLayout;
use crate::storage::settings::Settings;
use crate::workers::liveness::{self, PendingOperations};

/// Main application state
pub struct AppState {
    /// Shared deployment dependencies
    pub environment: Arc<DeploymentEnvironment>,

    /// Manager serving foreground requests
    pub manager: Arc<FetchDeploymentManager>,
}

impl AppState {
    /// Initialize application state with the git and script backed pipeline
    pub async fn init(
        layout: &SiteLayout,
        settings: Settings,
        liveness_options: liveness::Options,
    ) -> Result<Self, AgentError> {
        let repository_factory = Arc::new(GitRepositoryFactory::new(layout.repository_dir().path()));
        let deployer = Arc::new(ScriptDeployer::from_settings(&settings, layout.wwwroot_dir().path()));
        Self::init_with(layout, settings, liveness_options, repository_factory, deployer).await
    }

    /// Initialize application state around the given repository and deployer
    pub async fn init_with(
        layout: &SiteLayout,
        settings: Settings,
        liveness_options: liveness::Options,
        repository_factory: Arc<dyn RepositoryFactory>,
        deployer: Arc<dyn Deployer>,
    ) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        layout.setup().await?;

        let notifier = Arc::new(PostDeploymentNotifier::from_settings(&settings.notification)?);
        let pending_operations = PendingOperations::new(layout.pending_operation_file(), liveness_options);

        let environment = Arc::new(DeploymentEnvironment {
            layout: layout.clone(),
            settings,
            repository_factory,
            deployer,
            notifier,
            pending_operations,
        });
        let manager = Arc::new(environment.build_manager().await?);

        Ok(Self { environment, manager })
    }

    /// Give in-flight background deployments a bounded chance to finish
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        let pending = &self.environment.pending_operations;
        if pending.count() > 0 && !pending.wait_idle(timeout).await {
            warn!(
                pending = pending.count(),
                "Background deployments still running after {:?}",
                timeout
            );
        }
        Ok(())
    }
}
