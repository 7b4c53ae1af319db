//! Error types for the SCM agent

use thiserror::Error;

/// Main error type for the SCM agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The lock could not be acquired before the timeout expired
    #[error("Unable to acquire '{lock}' lock for operation '{operation}'")]
    LockOperation { lock: String, operation: String },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// True when the error only means "someone else holds the lock"
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, AgentError::LockOperation { .. })
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
