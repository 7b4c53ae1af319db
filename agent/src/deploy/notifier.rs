//! Best-effort deployment status notifications

use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::DeploymentNotificationStatus;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::storage::settings::NotificationSettings;

/// Posts deployment checkpoints to the platform's status endpoint.
///
/// Never fails the deployment: errors are retried a bounded number of
/// times, logged and reported as `false`.
pub struct PostDeploymentNotifier {
    client: Option<Arc<HttpClient>>,
    retry_count: u32,
    retry_delay: Duration,
}

impl PostDeploymentNotifier {
    pub fn new(client: Arc<HttpClient>, retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            client: Some(client),
            retry_count,
            retry_delay,
        }
    }

    /// Notifier that sends nothing
    pub fn disabled() -> Self {
        Self {
            client: None,
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Disabled when no base URL is configured
    pub fn from_settings(settings: &NotificationSettings) -> Result<Self, AgentError> {
        let Some(base_url) = settings.base_url.as_deref() else {
            return Ok(Self::disabled());
        };
        let client = HttpClient::new(base_url, settings.token.clone())?;
        Ok(Self::new(
            Arc::new(client),
            settings.retry_count,
            Duration::from_secs(settings.retry_delay_secs),
        ))
    }

    pub fn client(&self) -> Option<&Arc<HttpClient>> {
        self.client.as_ref()
    }

    /// Returns whether the endpoint accepted the notification
    pub async fn notify(&self, deployment_id: &str, status: DeploymentNotificationStatus) -> bool {
        let Some(client) = &self.client else {
            debug!(deployment_id, %status, "Status notifications disabled");
            return false;
        };

        let attempts = self.retry_count.max(1);
        for attempt in 1..=attempts {
            match client.update_deploy_status(deployment_id, status).await {
                Ok(()) => {
                    debug!(deployment_id, %status, attempt, "Status notification sent");
                    return true;
                }
                Err(e) => {
                    warn!(deployment_id, %status, attempt, error = %e, "Status notification failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        false
    }
}
