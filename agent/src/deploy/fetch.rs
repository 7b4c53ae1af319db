//! Fetch-based deployment orchestration.
//!
//! Decides whether a trigger runs now, in the background, later or not at
//! all, and runs the fetch, build and deploy pipeline under the deployment
//! lock. Triggers that lose the lock race while deferral is allowed only
//! touch the pending marker; the running pipeline notices the change when
//! its iteration ends and redeploys the latest state once.

use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::DeploymentNotificationStatus;
use tracing::{debug, info, warn};

use crate::deploy::auto_swap::AutoSwapHandler;
use crate::deploy::background::perform_background_deployment;
use crate::deploy::deployer::DeployContext;
use crate::deploy::environment::DeploymentEnvironment;
use crate::deploy::marker::PendingMarker;
use crate::deploy::request::{DeploymentRequest, FetchOutcome};
use crate::deploy::status::DeploymentStatus;
use crate::deploy::status_manager::{DeploymentStatusManager, TempDeployment};
use crate::errors::AgentError;
use crate::lock::{acquire_within, LockRegistry};
use crate::models::deployment::ChangeSet;

pub const DEPLOYMENT_OPERATION: &str = "Performing fetch based deployment";
pub const TEMP_DEPLOYMENT_TEXT: &str = "Fetching changes.";

/// How a deployment trigger was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDeploymentRequestResult {
    RunningAsynchronously,
    RanSynchronously,
    /// Lost the lock race; the running deployment will pick this up
    Pending,
    ForbiddenScmDisabled,
    ConflictDeploymentInProgress,
    ConflictRunFromRemoteZipConfigured,
    ConflictAutoSwapOngoing,
}

/// Orchestrates deployments for one site
pub struct FetchDeploymentManager {
    env: Arc<DeploymentEnvironment>,
    locks: Arc<LockRegistry>,
    status: Arc<DeploymentStatusManager>,
    auto_swap: AutoSwapHandler,
    marker: PendingMarker,
}

impl FetchDeploymentManager {
    pub async fn open(env: Arc<DeploymentEnvironment>, locks: Arc<LockRegistry>) -> Result<Self, AgentError> {
        let status = Arc::new(DeploymentStatusManager::new(
            env.layout.clone(),
            Arc::clone(locks.status()),
            env.settings.status_lock_timeout(),
        ));
        let auto_swap = AutoSwapHandler::new(&env.layout, &env.settings, env.notifier.client().cloned());
        let marker = PendingMarker::new(&env.layout);
        marker.ensure_exists().await?;

        Ok(Self {
            env,
            locks,
            status,
            auto_swap,
            marker,
        })
    }

    pub fn environment(&self) -> &Arc<DeploymentEnvironment> {
        &self.env
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn status(&self) -> &Arc<DeploymentStatusManager> {
        &self.status
    }

    pub fn marker(&self) -> &PendingMarker {
        &self.marker
    }

    /// Configuration that forbids this request, if any
    fn rejection(&self, request: &DeploymentRequest) -> Option<FetchDeploymentRequestResult> {
        let settings = &self.env.settings;
        if !settings.scm_enabled && !request.allow_while_scm_disabled {
            return Some(FetchDeploymentRequestResult::ForbiddenScmDisabled);
        }
        if settings.run_from_remote_zip() && !request.override_run_from_package {
            return Some(FetchDeploymentRequestResult::ConflictRunFromRemoteZipConfigured);
        }
        None
    }

    /// Handle one trigger.
    ///
    /// Foreground attempts never wait for the lock: a held lock either
    /// defers the request or rejects it.
    pub async fn fetch_deploy(
        &self,
        request: DeploymentRequest,
        async_requested: bool,
        target_branch: &str,
    ) -> Result<FetchDeploymentRequestResult, AgentError> {
        if let Some(rejected) = self.rejection(&request) {
            info!(tracking_id = %request.tracking_id, result = ?rejected, "Deployment request rejected");
            return Ok(rejected);
        }

        if async_requested || request.is_continuous {
            let wait_for_temp = request.wait_for_temp_deployment;
            let will_occur =
                perform_background_deployment(&self.env, request, target_branch.to_string(), wait_for_temp)
                    .await?;
            return Ok(if will_occur {
                FetchDeploymentRequestResult::RunningAsynchronously
            } else {
                FetchDeploymentRequestResult::ConflictDeploymentInProgress
            });
        }

        if self.auto_swap.is_auto_swap_ongoing().await? {
            info!(tracking_id = %request.tracking_id, "Auto swap in progress, rejecting deployment");
            return Ok(FetchDeploymentRequestResult::ConflictAutoSwapOngoing);
        }

        let guard = match acquire_within(self.locks.deployment(), DEPLOYMENT_OPERATION, Duration::ZERO).await {
            Ok(guard) => guard,
            Err(e) if e.is_lock_contention() => {
                return self.on_lock_contended(request.allow_deferred_deployment).await;
            }
            Err(e) => return Err(e),
        };

        self.perform_deployment(request, target_branch, None).await?;
        drop(guard);
        Ok(FetchDeploymentRequestResult::RanSynchronously)
    }

    /// Wait in line for the deployment lock, then deploy
    pub async fn queue_deploy(
        &self,
        request: DeploymentRequest,
        target_branch: &str,
    ) -> Result<FetchDeploymentRequestResult, AgentError> {
        if let Some(rejected) = self.rejection(&request) {
            return Ok(rejected);
        }

        let Some(guard) = self.locks.deployment_queue().acquire(DEPLOYMENT_OPERATION).await else {
            return Ok(FetchDeploymentRequestResult::ConflictDeploymentInProgress);
        };
        self.perform_deployment(request, target_branch, None).await?;
        drop(guard);
        Ok(FetchDeploymentRequestResult::RanSynchronously)
    }

    /// Outcome for a trigger that lost the lock race
    pub(crate) async fn on_lock_contended(
        &self,
        allow_deferred: bool,
    ) -> Result<FetchDeploymentRequestResult, AgentError> {
        if allow_deferred {
            self.marker.touch().await?;
            info!("Deployment in progress, request deferred");
            Ok(FetchDeploymentRequestResult::Pending)
        } else {
            info!("Deployment in progress, request rejected");
            Ok(FetchDeploymentRequestResult::ConflictDeploymentInProgress)
        }
    }

    /// Run the pipeline. The caller must hold the deployment lock.
    ///
    /// Reusable requests run again while the pending marker changes during
    /// an iteration, so triggers that arrived mid-run collapse into one
    /// redeploy of the latest state.
    pub async fn perform_deployment(
        &self,
        mut request: DeploymentRequest,
        target_branch: &str,
        temp_deployment: Option<TempDeployment>,
    ) -> Result<(), AgentError> {
        let original_target = request.target_changeset.clone();
        let mut temp_deployment = temp_deployment;
        let mut last_deployed: Option<ChangeSet> = None;

        loop {
            let marker_before = self.marker.last_modified().await?;

            let placeholder = match temp_deployment.take() {
                Some(temp) => temp,
                None => {
                    self.status
                        .create_temporary_deployment(
                            TEMP_DEPLOYMENT_TEXT,
                            request.target_changeset.as_ref(),
                            &request.deployer,
                        )
                        .await?
                }
            };
            self.notify(&request, DeploymentNotificationStatus::BuildRequestReceived)
                .await;

            let mut record_id = None;
            match self
                .run_iteration(&mut request, target_branch, &mut record_id)
                .await
            {
                Ok(deployed) => {
                    if let Err(e) = self.status.dispose(placeholder).await {
                        warn!(error = %e, "Unable to remove temporary deployment");
                    }
                    if deployed.is_some() {
                        last_deployed = deployed;
                    }
                }
                Err(e) => {
                    self.on_iteration_failed(&request, placeholder, record_id, &e)
                        .await;
                    return Err(e);
                }
            }

            let marker_after = self.marker.last_modified().await?;
            if !request.is_reusable || marker_after == marker_before {
                break;
            }
            info!(tracking_id = %request.tracking_id, "New deployment requested during run, redeploying latest");
            request.target_changeset = original_target.clone();
        }

        if let Some(changeset) = last_deployed {
            self.auto_swap_if_succeeded(&changeset).await;
        }
        Ok(())
    }

    /// One fetch and, if warranted, one build and deploy. Returns the
    /// deployed revision.
    async fn run_iteration(
        &self,
        request: &mut DeploymentRequest,
        target_branch: &str,
        record_id: &mut Option<String>,
    ) -> Result<Option<ChangeSet>, AgentError> {
        let repository = self.env.repository_factory.ensure_repository().await?;
        let fetcher = Arc::clone(&request.fetcher);

        match fetcher.fetch(repository.as_ref(), request, target_branch).await? {
            FetchOutcome::Fetched => {}
            FetchOutcome::NoChanges { reason } => {
                info!(reason, "Nothing to deploy");
                request.target_changeset = None;
            }
        }
        if request.target_changeset.is_none() {
            return Ok(None);
        }

        let reference = request.resolve_reference(target_branch).to_string();
        let changeset = repository
            .get_change_set(&reference)
            .await?
            .ok_or_else(|| AgentError::FetchError(format!("revision '{}' not found after fetch", reference)))?;

        if !self.should_deploy(request, &changeset).await? {
            info!(id = %changeset.id, "Revision is already active, skipping deployment");
            return Ok(None);
        }

        self.status
            .create(&changeset, &request.deployer, "Received")
            .await?;
        *record_id = Some(changeset.id.clone());
        self.notify(request, DeploymentNotificationStatus::BuildInProgress)
            .await;
        self.status
            .advance(&changeset.id, DeploymentStatus::Building, "Building")
            .await?;

        let context = DeployContext {
            repository,
            changeset: changeset.clone(),
            deployer: request.deployer.clone(),
            clean: request.clean,
            need_file_update: true,
            full_build_by_default: request.do_full_build,
            progress: self.status.progress(&changeset.id),
        };
        self.env.deployer.deploy(context).await?;

        self.status
            .complete(&changeset.id, "Deployment successful")
            .await?;
        self.status.set_active_deployment_id(&changeset.id).await?;
        self.notify(request, DeploymentNotificationStatus::BuildSuccessful)
            .await;
        Ok(Some(changeset))
    }

    /// Continuous triggers skip revisions that are already live, so
    /// duplicate webhook deliveries do not redeploy
    pub async fn should_deploy(&self, request: &DeploymentRequest, changeset: &ChangeSet) -> Result<bool, AgentError> {
        if !request.is_continuous {
            return Ok(true);
        }
        let active = self.status.active_deployment_id().await?;
        Ok(!active.is_some_and(|active| changeset.is_same_revision(&active)))
    }

    /// Keep one failed record as evidence: the real record if it exists,
    /// otherwise the placeholder
    async fn on_iteration_failed(
        &self,
        request: &DeploymentRequest,
        placeholder: TempDeployment,
        record_id: Option<String>,
        error: &AgentError,
    ) {
        let reason = error.to_string();
        match record_id {
            Some(id) => {
                if let Err(e) = self.status.mark_failed(&id, &reason).await {
                    warn!(id, error = %e, "Unable to mark deployment failed");
                }
                if let Err(e) = self.status.dispose(placeholder).await {
                    warn!(error = %e, "Unable to remove temporary deployment");
                }
            }
            None => {
                if let Err(e) = self.status.mark_failed(placeholder.id(), &reason).await {
                    warn!(id = placeholder.id(), error = %e, "Unable to mark deployment failed");
                }
            }
        }
        self.notify(request, DeploymentNotificationStatus::BuildFailed)
            .await;
        warn!(tracking_id = %request.tracking_id, error = %error, "Deployment failed");
    }

    async fn auto_swap_if_succeeded(&self, changeset: &ChangeSet) {
        if !self.auto_swap.is_enabled() {
            return;
        }
        match self.status.open(&changeset.id).await {
            Ok(Some(record)) if record.status == DeploymentStatus::Success => {
                if let Err(e) = self.auto_swap.handle_auto_swap(&changeset.id).await {
                    warn!(id = %changeset.id, error = %e, "Auto swap failed");
                }
            }
            Ok(_) => debug!(id = %changeset.id, "Last deployment did not succeed, no auto swap"),
            Err(e) => warn!(id = %changeset.id, error = %e, "Unable to read deployment status"),
        }
    }

    async fn notify(&self, request: &DeploymentRequest, status: DeploymentNotificationStatus) {
        self.env.notifier.notify(&request.tracking_id, status).await;
    }
}
