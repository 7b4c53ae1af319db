//! Slot auto-swap after continuous deployments

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use openapi_client::models::AutoSwapRequest;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::storage::layout::SiteLayout;
use crate::storage::settings::Settings;
use crate::utils::generate_uuid;

/// An auto-swap marker younger than this means a swap is still running
pub const AUTO_SWAP_LOCK_TTL: Duration = Duration::from_secs(2 * 60);

pub struct AutoSwapHandler {
    slot: Option<String>,
    marker: File,
    client: Option<Arc<HttpClient>>,
}

impl AutoSwapHandler {
    pub fn new(layout: &SiteLayout, settings: &Settings, client: Option<Arc<HttpClient>>) -> Self {
        Self {
            slot: settings
                .auto_swap_slot
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            marker: layout.auto_swap_marker_file(),
            client,
        }
    }

    /// Swapping into production itself is never automatic
    pub fn is_enabled(&self) -> bool {
        self.slot
            .as_deref()
            .is_some_and(|slot| !slot.eq_ignore_ascii_case("production"))
    }

    pub async fn is_auto_swap_ongoing(&self) -> Result<bool, AgentError> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let Some(modified) = self.marker.modified().await? else {
            return Ok(false);
        };
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        Ok(age < AUTO_SWAP_LOCK_TTL)
    }

    /// Record the swap and ask the platform to perform it. Endpoint failures
    /// are logged only.
    pub async fn handle_auto_swap(&self, deployment_id: &str) -> Result<(), AgentError> {
        let Some(slot) = self.slot.as_deref().filter(|_| self.is_enabled()) else {
            debug!("Auto swap not enabled");
            return Ok(());
        };

        let operation_id = generate_uuid();
        self.marker.write_string(&operation_id).await?;
        info!(deployment_id, slot, operation_id = %operation_id, "Requesting auto swap");

        let Some(client) = &self.client else {
            warn!("Auto swap requested but no platform endpoint is configured");
            return Ok(());
        };
        let request = AutoSwapRequest {
            operation_id,
            deployment_id: deployment_id.to_string(),
            target_slot: slot.to_string(),
            requested_at: Utc::now(),
        };
        if let Err(e) = client.request_auto_swap(&request).await {
            warn!(deployment_id, error = %e, "Auto swap request failed");
        }
        Ok(())
    }
}
