//! Source repository capability

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::models::deployment::ChangeSet;

/// A working tree the pipeline fetches into and deploys from
#[async_trait]
pub trait Repository: Send + Sync {
    fn path(&self) -> &Path;

    /// Resolve a branch or commit to a revision. `None` if it does not exist.
    async fn get_change_set(&self, reference: &str) -> Result<Option<ChangeSet>, AgentError>;

    /// Remove a repository-internal lock left by an interrupted operation.
    /// Returns whether anything was removed.
    fn clear_lock(&self) -> Result<bool, AgentError>;
}

#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// The existing repository, without creating one
    fn repository(&self) -> Option<Arc<dyn Repository>>;

    /// The repository, initialized if missing
    async fn ensure_repository(&self) -> Result<Arc<dyn Repository>, AgentError>;
}
