//! Notification models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment checkpoints reported to the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentNotificationStatus {
    BuildRequestReceived,
    BuildInProgress,
    BuildSuccessful,
    BuildFailed,
}

impl std::fmt::Display for DeploymentNotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentNotificationStatus::BuildRequestReceived => "BuildRequestReceived",
            DeploymentNotificationStatus::BuildInProgress => "BuildInProgress",
            DeploymentNotificationStatus::BuildSuccessful => "BuildSuccessful",
            DeploymentNotificationStatus::BuildFailed => "BuildFailed",
        };
        f.write_str(s)
    }
}

/// Status notification body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusNotification {
    pub deployment_id: String,
    pub deployment_status: DeploymentNotificationStatus,
}

/// Auto-swap request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSwapRequest {
    pub operation_id: String,
    pub deployment_id: String,
    pub target_slot: String,
    pub requested_at: DateTime<Utc>,
}
