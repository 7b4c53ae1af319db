//! Build and deploy capability

use std::sync::Arc;

use async_trait::async_trait;

use crate::deploy::repository::Repository;
use crate::deploy::status_manager::DeploymentProgress;
use crate::errors::AgentError;
use crate::models::deployment::ChangeSet;

/// Everything a deployer needs for one build
pub struct DeployContext {
    pub repository: Arc<dyn Repository>,
    pub changeset: ChangeSet,
    pub deployer: String,
    pub clean: bool,
    /// Whether the working tree changed and files must be copied again
    pub need_file_update: bool,
    pub full_build_by_default: bool,
    /// Status record of this deployment
    pub progress: DeploymentProgress,
}

/// Builds the fetched revision and publishes it to the live site.
///
/// Failures propagate and fail the deployment.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, context: DeployContext) -> Result<(), AgentError>;
}
