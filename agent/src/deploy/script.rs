//! Shell command deployer

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::deploy::deployer::{DeployContext, Deployer};
use crate::deploy::status::DeploymentStatus;
use crate::errors::AgentError;
use crate::storage::settings::Settings;

/// Runs the configured build and deploy commands in the working tree
pub struct ScriptDeployer {
    build_command: Option<String>,
    deploy_command: Option<String>,
    target_dir: PathBuf,
}

impl ScriptDeployer {
    pub fn new(build_command: Option<String>, deploy_command: Option<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_command,
            deploy_command,
            target_dir: target_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings, target_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            settings.build_command.clone(),
            settings.deploy_command.clone(),
            target_dir,
        )
    }

    async fn run(&self, dir: &Path, command: &str, context: &DeployContext) -> Result<(), AgentError> {
        info!("Running command: {}", command);
        let status = Command::new("bash")
            .current_dir(dir)
            .args(["-c", command])
            .env("SCM_COMMIT_ID", &context.changeset.id)
            .env("SCM_DEPLOYER", &context.deployer)
            .env("SCM_CLEAN", if context.clean { "1" } else { "0" })
            .env("SCM_FULL_BUILD", if context.full_build_by_default { "1" } else { "0" })
            .env("DEPLOYMENT_TARGET", &self.target_dir)
            .status()
            .await
            .map_err(|e| AgentError::DeployError(format!("Failed to run command: {}", e)))?;

        if !status.success() {
            return Err(AgentError::DeployError(format!(
                "Command '{}' failed with {}",
                command, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Deployer for ScriptDeployer {
    async fn deploy(&self, context: DeployContext) -> Result<(), AgentError> {
        let dir = context.repository.path().to_path_buf();

        if let Some(command) = self.build_command.as_deref().filter(|c| !c.trim().is_empty()) {
            self.run(&dir, command, &context).await?;
        }

        context
            .progress
            .report(DeploymentStatus::Deploying, "Deploying")
            .await?;

        match self.deploy_command.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(command) if context.need_file_update => self.run(&dir, command, &context).await?,
            Some(_) => info!("Working tree unchanged, skipping deploy command"),
            None => info!("No deploy command configured"),
        }

        info!("Successfully deployed {}", context.changeset.id);
        Ok(())
    }
}
