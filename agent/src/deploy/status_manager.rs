//! Deployment status records and the active deployment pointer

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::status::{DeploymentStatus, DeploymentStatusRecord};
use crate::errors::AgentError;
use crate::lock::{lock_operation, OperationLock};
use crate::models::deployment::ChangeSet;
use crate::storage::layout::SiteLayout;

/// Tracks per-deployment status records and which deployment is live.
///
/// Writes go through the `status` lock, which is separate from the
/// deployment lock so status stays readable and writable while a
/// deployment runs.
pub struct DeploymentStatusManager {
    layout: SiteLayout,
    status_lock: Arc<dyn OperationLock>,
    lock_timeout: Duration,
}

impl DeploymentStatusManager {
    pub fn new(layout: SiteLayout, status_lock: Arc<dyn OperationLock>, lock_timeout: Duration) -> Self {
        Self {
            layout,
            status_lock,
            lock_timeout,
        }
    }

    /// Create (or reset) the record for `changeset`
    pub async fn create(
        &self,
        changeset: &ChangeSet,
        deployer: &str,
        status_text: &str,
    ) -> Result<DeploymentStatusRecord, AgentError> {
        validate_id(&changeset.id)?;
        let record = DeploymentStatusRecord::new(changeset, deployer, status_text);
        lock_operation(&self.status_lock, "Creating deployment status", self.lock_timeout, || async {
            self.write(&record).await
        })
        .await?;
        debug!(id = %record.id, "Deployment status created");
        Ok(record)
    }

    pub async fn open(&self, id: &str) -> Result<Option<DeploymentStatusRecord>, AgentError> {
        validate_id(id)?;
        let file = self.layout.deployment_status_file(id);
        match file.read_string_opt().await? {
            Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            None => Ok(None),
        }
    }

    /// All records, most recently received first. Unreadable records are
    /// skipped.
    pub async fn list(&self) -> Result<Vec<DeploymentStatusRecord>, AgentError> {
        let mut records = Vec::new();
        for dir in self.layout.deployments_dir().list_dirs().await? {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.open(id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(id, error = %e, "Skipping unreadable deployment status"),
            }
        }
        records.sort_by(|a, b| b.received_time.cmp(&a.received_time));
        Ok(records)
    }

    /// Read-modify-write one record under the status lock
    pub async fn update<F>(&self, id: &str, change: F) -> Result<DeploymentStatusRecord, AgentError>
    where
        F: FnOnce(&mut DeploymentStatusRecord) -> Result<(), AgentError>,
    {
        validate_id(id)?;
        lock_operation(&self.status_lock, "Updating deployment status", self.lock_timeout, || async {
            let mut record = self
                .open(id)
                .await?
                .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
            change(&mut record)?;
            self.write(&record).await?;
            Ok(record)
        })
        .await
    }

    pub async fn advance(
        &self,
        id: &str,
        next: DeploymentStatus,
        status_text: &str,
    ) -> Result<DeploymentStatusRecord, AgentError> {
        let record = self
            .update(id, |record| {
                record.transition(next)?;
                record.status_text = status_text.to_string();
                Ok(())
            })
            .await?;
        debug!(id, status = %next, "Deployment status advanced");
        Ok(record)
    }

    pub async fn complete(&self, id: &str, status_text: &str) -> Result<DeploymentStatusRecord, AgentError> {
        let record = self.advance(id, DeploymentStatus::Success, status_text).await?;
        info!(id, "Deployment succeeded");
        Ok(record)
    }

    /// Mark a deployment failed. Already-failed records are left as they are.
    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<DeploymentStatusRecord, AgentError> {
        let record = self
            .update(id, |record| {
                if record.status == DeploymentStatus::Failed {
                    return Ok(());
                }
                record.transition(DeploymentStatus::Failed)?;
                record.status_text = reason.to_string();
                Ok(())
            })
            .await?;
        info!(id, reason, "Deployment failed");
        Ok(record)
    }

    /// Delete a finished deployment's record.
    ///
    /// The active deployment and deployments still in progress are refused.
    pub async fn delete(&self, id: &str) -> Result<(), AgentError> {
        validate_id(id)?;
        lock_operation(&self.status_lock, "Deleting deployment", self.lock_timeout, || async {
            let record = self
                .open(id)
                .await?
                .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
            if record.is_in_progress() {
                return Err(AgentError::Conflict(format!("deployment {} is in progress", id)));
            }
            let active = self.active_deployment_id().await?;
            if active.as_deref().is_some_and(|active| active.eq_ignore_ascii_case(id)) {
                return Err(AgentError::Conflict(format!("deployment {} is active", id)));
            }
            self.remove(id).await
        })
        .await?;
        info!(id, "Deployment deleted");
        Ok(())
    }

    /// Id of the live deployment. Read without the status lock.
    pub async fn active_deployment_id(&self) -> Result<Option<String>, AgentError> {
        let contents = self.layout.active_deployment_file().read_string_opt().await?;
        Ok(contents
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub async fn set_active_deployment_id(&self, id: &str) -> Result<(), AgentError> {
        lock_operation(&self.status_lock, "Updating active deployment id", self.lock_timeout, || async {
            self.layout.active_deployment_file().write_atomic(id.as_bytes()).await
        })
        .await?;
        info!(id, "Active deployment updated");
        Ok(())
    }

    /// Create a placeholder record visible to pollers before the real
    /// revision is known
    pub async fn create_temporary_deployment(
        &self,
        status_text: &str,
        changeset: Option<&ChangeSet>,
        deployer: &str,
    ) -> Result<TempDeployment, AgentError> {
        let mut changeset = match changeset {
            Some(changeset) if changeset.is_temporary => changeset.clone(),
            Some(changeset) => ChangeSet {
                id: crate::utils::generate_temp_id(),
                ..changeset.clone()
            }
            .temporary(),
            None => ChangeSet::new(crate::utils::generate_temp_id()).temporary(),
        };
        if changeset.message.is_none() {
            changeset.message = Some(status_text.to_string());
        }
        self.create(&changeset, deployer, status_text).await?;
        Ok(TempDeployment { changeset })
    }

    /// Delete a placeholder record
    pub async fn dispose(&self, temp: TempDeployment) -> Result<(), AgentError> {
        let id = temp.changeset.id;
        lock_operation(&self.status_lock, "Removing temporary deployment", self.lock_timeout, || async {
            self.remove(&id).await
        })
        .await?;
        debug!(id = %id, "Temporary deployment removed");
        Ok(())
    }

    /// Handle the deployer uses to report phase changes
    pub fn progress(self: &Arc<Self>, id: &str) -> DeploymentProgress {
        DeploymentProgress {
            manager: Arc::clone(self),
            id: id.to_string(),
        }
    }

    async fn write(&self, record: &DeploymentStatusRecord) -> Result<(), AgentError> {
        self.layout
            .deployment_status_file(&record.id)
            .write_json(record)
            .await
    }

    async fn remove(&self, id: &str) -> Result<(), AgentError> {
        self.layout.deployments_dir().subdir(id).delete().await
    }
}

/// Placeholder status record, removed on success and kept on failure
#[derive(Debug, Clone)]
pub struct TempDeployment {
    changeset: ChangeSet,
}

impl TempDeployment {
    pub fn changeset(&self) -> &ChangeSet {
        &self.changeset
    }

    pub fn id(&self) -> &str {
        &self.changeset.id
    }
}

/// Reports phase changes of one deployment
#[derive(Clone)]
pub struct DeploymentProgress {
    manager: Arc<DeploymentStatusManager>,
    id: String,
}

impl DeploymentProgress {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn report(&self, next: DeploymentStatus, status_text: &str) -> Result<(), AgentError> {
        self.manager.advance(&self.id, next, status_text).await?;
        Ok(())
    }
}

/// Ids name directories, so they must be a single plain path component
fn validate_id(id: &str) -> Result<(), AgentError> {
    let mut components = Path::new(id).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if id.is_empty() || !plain || id.contains(['/', '\\']) {
        return Err(AgentError::NotFound(format!("deployment {}", id)));
    }
    Ok(())
}
