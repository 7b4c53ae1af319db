//! Agent API models

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Body of a deployment trigger (git push hook, CI webhook, manual call)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTriggerRequest {
    /// Remote repository to fetch from. Falls back to the site setting.
    #[serde(default)]
    pub repository_url: Option<String>,

    /// Branch to deploy. Falls back to the site setting.
    #[serde(default)]
    pub branch: Option<String>,

    /// Explicit commit to deploy instead of the branch head
    #[serde(default)]
    pub commit_id: Option<String>,

    /// Name of whoever triggered the deployment
    #[serde(default)]
    pub deployer: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub author_email: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub is_continuous: bool,

    #[serde(default)]
    pub allow_deferred: bool,

    #[serde(default)]
    pub allow_while_scm_disabled: bool,

    #[serde(default)]
    pub is_reusable: bool,

    #[serde(default)]
    pub do_full_build: bool,

    #[serde(default)]
    pub clean: bool,

    /// Wait FIFO for the deployment lock instead of failing fast
    #[serde(default)]
    pub queue: bool,

    /// Background runs only: respond once the placeholder record exists
    #[serde(default)]
    pub wait_for_temp_deployment: bool,
}

/// Outcome of a deployment trigger, as reported over the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerOutcome {
    RunningAsynchronously,
    RanSynchronously,
    Pending,
    ForbiddenScmDisabled,
    ConflictDeploymentInProgress,
    ConflictRunFromRemoteZipConfigured,
    ConflictAutoSwapOngoing,
}

impl TriggerOutcome {
    /// HTTP status returned to the caller for this outcome
    pub fn status_code(&self) -> StatusCode {
        match self {
            TriggerOutcome::RanSynchronously => StatusCode::OK,
            TriggerOutcome::RunningAsynchronously | TriggerOutcome::Pending => StatusCode::ACCEPTED,
            TriggerOutcome::ForbiddenScmDisabled => StatusCode::FORBIDDEN,
            TriggerOutcome::ConflictDeploymentInProgress
            | TriggerOutcome::ConflictRunFromRemoteZipConfigured
            | TriggerOutcome::ConflictAutoSwapOngoing => StatusCode::CONFLICT,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TriggerOutcome::RunningAsynchronously => "Deployment is running in the background",
            TriggerOutcome::RanSynchronously => "Deployment completed",
            TriggerOutcome::Pending => "Another deployment is in progress; this request was deferred",
            TriggerOutcome::ForbiddenScmDisabled => "Source control deployments are disabled for this site",
            TriggerOutcome::ConflictDeploymentInProgress => "Another deployment is in progress",
            TriggerOutcome::ConflictRunFromRemoteZipConfigured => {
                "Site runs from a remote package; deployments cannot update it"
            }
            TriggerOutcome::ConflictAutoSwapOngoing => "An auto-swap is in progress",
        }
    }
}

/// Trigger response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTriggerResponse {
    pub result: TriggerOutcome,
    pub message: String,
    pub tracking_id: String,
}

/// Error body for failed calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Deployment view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub id: String,
    pub status: String,
    pub status_text: String,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub deployer: String,
    pub message: Option<String>,
    pub received_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub complete: bool,
    pub active: bool,
    pub is_temp: bool,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}

/// Named lock view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatusResponse {
    pub name: String,
    pub held: bool,
    pub operation_name: Option<String>,
    pub instance_id: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
}
