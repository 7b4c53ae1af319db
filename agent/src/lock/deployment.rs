//! The deployment lock

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::repository::RepositoryFactory;
use crate::lock::{LockInfo, OperationLock};

/// Deployment lock that clears the repository's internal lock on acquire.
///
/// A fetch interrupted by a crash can leave the repository locked. Once the
/// deployment lock is ours, nobody else can be using the repository, so the
/// leftover lock is removed.
pub struct DeploymentLock {
    inner: Arc<dyn OperationLock>,
    repository_factory: Arc<dyn RepositoryFactory>,
}

impl DeploymentLock {
    pub fn new(inner: Arc<dyn OperationLock>, repository_factory: Arc<dyn RepositoryFactory>) -> Self {
        Self {
            inner,
            repository_factory,
        }
    }

    fn on_lock_acquired(&self) {
        let Some(repository) = self.repository_factory.repository() else {
            return;
        };
        match repository.clear_lock() {
            Ok(true) => info!(repository = %repository.path().display(), "Cleared stale repository lock"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Unable to clear repository lock"),
        }
    }
}

impl OperationLock for DeploymentLock {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn is_held(&self) -> bool {
        self.inner.is_held()
    }

    fn lock(&self, operation: &str) -> bool {
        if !self.inner.lock(operation) {
            return false;
        }
        self.on_lock_acquired();
        true
    }

    fn release(&self) {
        self.inner.release();
    }

    fn lock_info(&self) -> Option<LockInfo> {
        self.inner.lock_info()
    }
}
