//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    DeployTriggerRequest, DeployTriggerResponse, DeploymentListResponse, DeploymentResponse,
    ErrorResponse, HealthResponse, LockStatusResponse, TriggerOutcome, VersionResponse,
};
use http::StatusCode;
use serde::Deserialize;
use tracing::error;

use crate::deploy::fetch::FetchDeploymentRequestResult;
use crate::deploy::request::DeploymentRequest;
use crate::deploy::status::DeploymentStatusRecord;
use crate::errors::AgentError;
use crate::server::state::ServerState;
use crate::utils::version_info;

impl From<FetchDeploymentRequestResult> for TriggerOutcome {
    fn from(result: FetchDeploymentRequestResult) -> Self {
        match result {
            FetchDeploymentRequestResult::RunningAsynchronously => TriggerOutcome::RunningAsynchronously,
            FetchDeploymentRequestResult::RanSynchronously => TriggerOutcome::RanSynchronously,
            FetchDeploymentRequestResult::Pending => TriggerOutcome::Pending,
            FetchDeploymentRequestResult::ForbiddenScmDisabled => TriggerOutcome::ForbiddenScmDisabled,
            FetchDeploymentRequestResult::ConflictDeploymentInProgress => {
                TriggerOutcome::ConflictDeploymentInProgress
            }
            FetchDeploymentRequestResult::ConflictRunFromRemoteZipConfigured => {
                TriggerOutcome::ConflictRunFromRemoteZipConfigured
            }
            FetchDeploymentRequestResult::ConflictAutoSwapOngoing => TriggerOutcome::ConflictAutoSwapOngoing,
        }
    }
}

/// Error body with a status matching the error kind
fn error_response(err: AgentError) -> Response {
    let status = match &err {
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentError::Conflict(_) | AgentError::LockOperation { .. } => StatusCode::CONFLICT,
        _ => {
            error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn deployment_response(record: DeploymentStatusRecord, active_id: Option<&str>) -> DeploymentResponse {
    let active = active_id.is_some_and(|id| id.eq_ignore_ascii_case(&record.id));
    DeploymentResponse {
        id: record.id,
        status: record.status.to_string(),
        status_text: record.status_text,
        author: record.author,
        author_email: record.author_email,
        deployer: record.deployer,
        message: record.message,
        received_time: record.received_time,
        start_time: record.start_time,
        end_time: record.end_time,
        complete: record.complete,
        active,
        is_temp: record.is_temporary,
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "scm-agent".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct DeployQuery {
    #[serde(default, rename = "isAsync")]
    pub is_async: bool,
}

/// Deployment trigger handler
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeployQuery>,
    Json(body): Json<DeployTriggerRequest>,
) -> Response {
    let settings = &state.manager.environment().settings;
    let branch = body
        .branch
        .clone()
        .unwrap_or_else(|| settings.branch.clone());

    let mut request = DeploymentRequest::new(
        body.deployer.as_deref().unwrap_or("api"),
        Arc::clone(&state.fetcher),
    )
    .continuous(body.is_continuous)
    .allow_deferred(body.allow_deferred)
    .allow_while_scm_disabled(body.allow_while_scm_disabled)
    .reusable(body.is_reusable)
    .full_build(body.do_full_build)
    .clean(body.clean)
    .wait_for_temp_deployment(body.wait_for_temp_deployment);
    if let Some(url) = body.repository_url.clone().or_else(|| settings.repository_url.clone()) {
        request = request.with_repository_url(url);
    }
    if let Some(commit_id) = body.commit_id.clone() {
        request = request.with_commit_id(commit_id);
    }
    if let Some(author) = body.author.clone() {
        request = request.with_author(author, body.author_email.clone());
    }
    if let Some(message) = body.message.clone() {
        request = request.with_message(message);
    }
    let tracking_id = request.tracking_id.clone();

    let result = if body.queue {
        state.manager.queue_deploy(request, &branch).await
    } else {
        state.manager.fetch_deploy(request, query.is_async, &branch).await
    };

    match result {
        Ok(result) => {
            let outcome = TriggerOutcome::from(result);
            (
                outcome.status_code(),
                Json(DeployTriggerResponse {
                    result: outcome,
                    message: outcome.message().to_string(),
                    tracking_id,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Deployment list handler
pub async fn deployments_handler(State(state): State<Arc<ServerState>>) -> Response {
    let status = state.manager.status();
    let result = futures::try_join!(status.list(), status.active_deployment_id());

    match result {
        Ok((records, active)) => {
            let deployments: Vec<DeploymentResponse> = records
                .into_iter()
                .map(|record| deployment_response(record, active.as_deref()))
                .collect();
            let total = deployments.len();
            Json(DeploymentListResponse { deployments, total }).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Active deployment handler
pub async fn active_deployment_handler(State(state): State<Arc<ServerState>>) -> Response {
    let status = state.manager.status();
    let result = async {
        let id = status
            .active_deployment_id()
            .await?
            .ok_or_else(|| AgentError::NotFound("no active deployment".to_string()))?;
        let record = status
            .open(&id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
        Ok::<_, AgentError>(deployment_response(record, Some(&id)))
    }
    .await;

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

/// Single deployment handler
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    let status = state.manager.status();
    let result = async {
        let record = status
            .open(&id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
        let active = status.active_deployment_id().await?;
        Ok::<_, AgentError>(deployment_response(record, active.as_deref()))
    }
    .await;

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

/// Deployment delete handler
pub async fn delete_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.status().delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Named lock handler
pub async fn lock_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Response {
    let Some(named) = state.manager.locks().get(&name) else {
        return error_response(AgentError::NotFound(format!("lock {}", name)));
    };

    let lock = named.lock();
    let held = lock.is_held();
    let info = if held { lock.lock_info() } else { None };
    Json(LockStatusResponse {
        name,
        held,
        operation_name: info.as_ref().map(|i| i.operation_name.clone()),
        instance_id: info.as_ref().map(|i| i.instance_id.clone()),
        acquired_at: info.map(|i| i.acquired_at),
    })
    .into_response()
}
