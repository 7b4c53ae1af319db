//! Deployments that outlive the request that triggered them

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, info_span, warn, Instrument};

use crate::deploy::environment::DeploymentEnvironment;
use crate::deploy::fetch::{FetchDeploymentManager, FetchDeploymentRequestResult, TEMP_DEPLOYMENT_TEXT};
use crate::deploy::request::DeploymentRequest;
use crate::deploy::status_manager::TempDeployment;
use crate::errors::AgentError;
use crate::lock::{acquire_within, LockGuard};

pub const BACKGROUND_OPERATION: &str = "Performing continuous deployment";

/// Start a deployment on its own task and report whether it will occur.
///
/// The task builds its own manager (lock handles and status manager) and
/// runs under a root span, so nothing ties it to the caller. When deferral
/// is not allowed the caller waits until the task has either taken the
/// deployment lock (`true`) or lost the race (`false`). A task that fails
/// before reaching that point surfaces its error here. With
/// `wait_for_temp_deployment` the caller also waits until the placeholder
/// record exists or the task ends, whichever comes first.
pub async fn perform_background_deployment(
    env: &Arc<DeploymentEnvironment>,
    request: DeploymentRequest,
    target_branch: String,
    wait_for_temp_deployment: bool,
) -> Result<bool, AgentError> {
    let allow_deferred = request.allow_deferred_deployment;
    let (will_occur_tx, mut will_occur_rx) = oneshot::channel();
    let (temp_tx, temp_rx) = oneshot::channel();

    let span = info_span!(
        parent: None,
        "background_deployment",
        tracking_id = %request.tracking_id,
        deployer = %request.deployer,
    );
    let task_env = Arc::clone(env);
    let mut task = tokio::spawn(
        async move {
            let pending = task_env.pending_operations.clone();
            let result = pending
                .track(
                    tokio::time::sleep,
                    run(task_env, request, target_branch, will_occur_tx, temp_tx),
                )
                .await;
            if let Err(e) = &result {
                error!(error = %e, "Background deployment failed");
            }
            result
        }
        .instrument(span),
    );

    if wait_for_temp_deployment {
        let failed_early = tokio::select! {
            created = temp_rx => created.is_err(),
            _ = &mut task => false,
        };
        // No placeholder is coming; let the task report why
        if failed_early {
            let _ = task.await;
        }
    }

    if allow_deferred {
        return match will_occur_rx.try_recv() {
            Ok(Err(e)) => Err(e),
            _ => Ok(true),
        };
    }
    match will_occur_rx.await {
        Ok(decision) => decision,
        Err(_) => Err(AgentError::Internal(
            "background deployment ended without a decision".to_string(),
        )),
    }
}

/// How the task got past the lock attempt
enum Start {
    Locked {
        manager: FetchDeploymentManager,
        temp: TempDeployment,
        guard: LockGuard,
    },
    /// Lost the lock; `true` when a pending marker was left
    Contended(bool),
}

async fn run(
    env: Arc<DeploymentEnvironment>,
    request: DeploymentRequest,
    target_branch: String,
    will_occur: oneshot::Sender<Result<bool, AgentError>>,
    temp_created: oneshot::Sender<()>,
) -> Result<(), AgentError> {
    let (manager, temp, guard) = match start(&env, &request, temp_created).await {
        Ok(Start::Locked { manager, temp, guard }) => (manager, temp, guard),
        Ok(Start::Contended(will_occur_later)) => {
            let _ = will_occur.send(Ok(will_occur_later));
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "Background deployment could not start");
            let _ = will_occur.send(Err(e));
            return Ok(());
        }
    };
    let _ = will_occur.send(Ok(true));

    info!("Background deployment started");
    manager
        .perform_deployment(request, &target_branch, Some(temp))
        .await?;
    drop(guard);
    Ok(())
}

async fn start(
    env: &Arc<DeploymentEnvironment>,
    request: &DeploymentRequest,
    temp_created: oneshot::Sender<()>,
) -> Result<Start, AgentError> {
    let manager = env.build_manager().await?;
    let temp = manager
        .status()
        .create_temporary_deployment(
            TEMP_DEPLOYMENT_TEXT,
            request.target_changeset.as_ref(),
            &request.deployer,
        )
        .await?;
    let _ = temp_created.send(());

    match acquire_within(manager.locks().deployment(), BACKGROUND_OPERATION, Duration::ZERO).await {
        Ok(guard) => Ok(Start::Locked { manager, temp, guard }),
        Err(e) => {
            if let Err(dispose_err) = manager.status().dispose(temp).await {
                warn!(error = %dispose_err, "Unable to remove temporary deployment");
            }
            if !e.is_lock_contention() {
                return Err(e);
            }
            let result = manager
                .on_lock_contended(request.allow_deferred_deployment)
                .await?;
            Ok(Start::Contended(result == FetchDeploymentRequestResult::Pending))
        }
    }
}
