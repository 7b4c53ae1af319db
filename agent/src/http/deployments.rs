//! Deployment status and auto-swap endpoints

use openapi_client::models::{AutoSwapRequest, DeploymentNotificationStatus, DeploymentStatusNotification};

use crate::errors::AgentError;
use crate::http::client::HttpClient;

pub const UPDATE_DEPLOY_STATUS_PATH: &str = "/api/updatedeploystatus";
pub const AUTO_SWAP_PATH: &str = "/api/autoswap";

impl HttpClient {
    /// Report a deployment checkpoint
    pub async fn update_deploy_status(
        &self,
        deployment_id: &str,
        status: DeploymentNotificationStatus,
    ) -> Result<(), AgentError> {
        let body = DeploymentStatusNotification {
            deployment_id: deployment_id.to_string(),
            deployment_status: status,
        };
        self.post_json(UPDATE_DEPLOY_STATUS_PATH, &body).await
    }

    /// Ask the platform to swap the deployed slot
    pub async fn request_auto_swap(&self, request: &AutoSwapRequest) -> Result<(), AgentError> {
        self.post_json(AUTO_SWAP_PATH, request).await
    }
}
