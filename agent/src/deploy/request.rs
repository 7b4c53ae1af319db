//! Deployment triggers and the fetch capability

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::deploy::repository::Repository;
use crate::errors::AgentError;
use crate::models::deployment::ChangeSet;

/// Result of pulling a revision into the working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The working tree now holds the requested revision
    Fetched,
    /// Nothing to deploy, e.g. the branch does not exist remotely
    NoChanges { reason: String },
}

/// Pulls the requested revision into the repository's working tree
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        repository: &dyn Repository,
        request: &DeploymentRequest,
        target_branch: &str,
    ) -> Result<FetchOutcome, AgentError>;
}

/// One inbound deployment trigger, consumed once by the pipeline
#[derive(Clone)]
pub struct DeploymentRequest {
    /// Id used for status notifications before the revision is known
    pub tracking_id: String,
    pub repository_url: Option<String>,
    pub deployer: String,
    pub message: Option<String>,
    /// Revision described by the trigger. Cleared when the fetch finds
    /// nothing to deploy.
    pub target_changeset: Option<ChangeSet>,
    /// Explicit revision to deploy instead of the branch head
    pub commit_id: Option<String>,
    pub is_continuous: bool,
    pub allow_deferred_deployment: bool,
    pub allow_while_scm_disabled: bool,
    pub override_run_from_package: bool,
    /// Redeploy when another trigger arrives during the run
    pub is_reusable: bool,
    pub do_full_build: bool,
    pub clean: bool,
    /// Background runs only: return once the placeholder record exists
    pub wait_for_temp_deployment: bool,
    pub fetcher: Arc<dyn Fetcher>,
}

impl DeploymentRequest {
    pub fn new(deployer: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        let deployer = deployer.into();
        Self {
            tracking_id: crate::utils::generate_temp_id(),
            repository_url: None,
            target_changeset: Some(ChangeSet::new(crate::utils::generate_temp_id()).temporary()),
            deployer,
            message: None,
            commit_id: None,
            is_continuous: false,
            allow_deferred_deployment: false,
            allow_while_scm_disabled: false,
            override_run_from_package: false,
            is_reusable: false,
            do_full_build: false,
            clean: false,
            wait_for_temp_deployment: false,
            fetcher,
        }
    }

    pub fn with_tracking_id(mut self, tracking_id: impl Into<String>) -> Self {
        self.tracking_id = tracking_id.into();
        self
    }

    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if let Some(changeset) = self.target_changeset.as_mut() {
            changeset.message = Some(message.clone());
        }
        self.message = Some(message);
        self
    }

    pub fn with_author(mut self, name: impl Into<String>, email: Option<String>) -> Self {
        let name = name.into();
        if let Some(changeset) = self.target_changeset.take() {
            self.target_changeset = Some(changeset.with_author(name, email));
        }
        self
    }

    pub fn with_commit_id(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    pub fn continuous(mut self, value: bool) -> Self {
        self.is_continuous = value;
        self
    }

    pub fn allow_deferred(mut self, value: bool) -> Self {
        self.allow_deferred_deployment = value;
        self
    }

    pub fn allow_while_scm_disabled(mut self, value: bool) -> Self {
        self.allow_while_scm_disabled = value;
        self
    }

    pub fn override_run_from_package(mut self, value: bool) -> Self {
        self.override_run_from_package = value;
        self
    }

    pub fn reusable(mut self, value: bool) -> Self {
        self.is_reusable = value;
        self
    }

    pub fn full_build(mut self, value: bool) -> Self {
        self.do_full_build = value;
        self
    }

    pub fn clean(mut self, value: bool) -> Self {
        self.clean = value;
        self
    }

    pub fn wait_for_temp_deployment(mut self, value: bool) -> Self {
        self.wait_for_temp_deployment = value;
        self
    }

    /// Revision to resolve after fetching: the explicit commit, else the branch
    pub fn resolve_reference<'a>(&'a self, target_branch: &'a str) -> &'a str {
        self.commit_id.as_deref().unwrap_or(target_branch)
    }
}

impl fmt::Debug for DeploymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentRequest")
            .field("tracking_id", &self.tracking_id)
            .field("repository_url", &self.repository_url)
            .field("deployer", &self.deployer)
            .field("target_changeset", &self.target_changeset.as_ref().map(|c| &c.id))
            .field("commit_id", &self.commit_id)
            .field("is_continuous", &self.is_continuous)
            .field("allow_deferred_deployment", &self.allow_deferred_deployment)
            .field("is_reusable", &self.is_reusable)
            .finish_non_exhaustive()
    }
}
