//! Deployment status state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::models::deployment::ChangeSet;

/// Phase of one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Received, nothing has run yet
    Pending,

    /// Build in progress
    Building,

    /// Copying the build output to the live site
    Deploying,

    Success,

    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::Building => 1,
            DeploymentStatus::Deploying => 2,
            DeploymentStatus::Success | DeploymentStatus::Failed => 3,
        }
    }

    /// Transitions only move forward. Failure may be marked from any
    /// in-progress phase; finished deployments never change.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            DeploymentStatus::Failed => true,
            _ => next.rank() >= self.rank(),
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted status of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusRecord {
    pub id: String,
    pub status: DeploymentStatus,
    pub status_text: String,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub deployer: String,
    pub message: Option<String>,
    pub received_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_success_end_time: Option<DateTime<Utc>>,
    pub complete: bool,
    #[serde(default)]
    pub is_temporary: bool,
}

impl DeploymentStatusRecord {
    pub fn new(changeset: &ChangeSet, deployer: &str, status_text: &str) -> Self {
        Self {
            id: changeset.id.clone(),
            status: DeploymentStatus::Pending,
            status_text: status_text.to_string(),
            author: changeset.author_name.clone(),
            author_email: changeset.author_email.clone(),
            deployer: deployer.to_string(),
            message: changeset.message.clone(),
            received_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_success_end_time: None,
            complete: false,
            is_temporary: changeset.is_temporary,
        }
    }

    /// Move to `next`, stamping start and end times
    pub fn transition(&mut self, next: DeploymentStatus) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition(format!(
                "deployment {}: {} -> {}",
                self.id, self.status, next
            )));
        }

        let now = Utc::now();
        if next != DeploymentStatus::Pending && self.start_time.is_none() {
            self.start_time = Some(now);
        }
        if next.is_terminal() {
            self.end_time = Some(now);
            self.complete = true;
            if next == DeploymentStatus::Success {
                self.last_success_end_time = Some(now);
            }
        }
        self.status = next;
        Ok(())
    }

    pub fn is_in_progress(&self) -> bool {
        !self.complete
    }
}
