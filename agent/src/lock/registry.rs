//! Process-wide set of named locks

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::deploy::repository::RepositoryFactory;
use crate::lock::deployment::DeploymentLock;
use crate::lock::policy::{AcquireFailurePolicy, ReadOnlyProbe};
use crate::lock::queue::AsyncLockQueue;
use crate::lock::{AdvisoryFileLock, OperationLock, WatchFileLock};
use crate::storage::layout::{SiteLayout, DEPLOYMENT_LOCK, HOOKS_LOCK, SSH_LOCK, STATUS_LOCK};
use crate::storage::settings::{LockBackend, Settings};

/// A named lock and its lazily created waiter queue
pub struct NamedLock {
    lock: Arc<dyn OperationLock>,
    queue: OnceLock<AsyncLockQueue>,
}

impl NamedLock {
    fn new(lock: Arc<dyn OperationLock>) -> Self {
        Self {
            lock,
            queue: OnceLock::new(),
        }
    }

    pub fn lock(&self) -> &Arc<dyn OperationLock> {
        &self.lock
    }

    /// FIFO queue for async waiters. First use must be inside a tokio runtime.
    pub fn queue(&self) -> &AsyncLockQueue {
        self.queue
            .get_or_init(|| AsyncLockQueue::new(Arc::clone(&self.lock)))
    }
}

/// Owns one handle per named lock.
///
/// Registries opened on the same layout coordinate through the same files
/// but hold independent handles.
pub struct LockRegistry {
    backend: LockBackend,
    deployment: NamedLock,
    status: NamedLock,
    hooks: NamedLock,
    ssh: NamedLock,
}

impl LockRegistry {
    pub fn open(
        layout: &SiteLayout,
        settings: &Settings,
        repository_factory: Arc<dyn RepositoryFactory>,
    ) -> Self {
        let backend = resolve_backend(settings.lock_backend);
        let policy = AcquireFailurePolicy::new(ReadOnlyProbe::new(layout.base_dir()));
        let max_age = settings.watch_lock_max_age();

        let make = |name: &str| -> Arc<dyn OperationLock> {
            let path = layout.lock_file(name);
            match backend {
                LockBackend::Watch => {
                    Arc::new(WatchFileLock::new(name, path, policy.clone()).with_max_age(max_age))
                }
                _ => Arc::new(AdvisoryFileLock::new(name, path, policy.clone())),
            }
        };

        let deployment: Arc<dyn OperationLock> =
            Arc::new(DeploymentLock::new(make(DEPLOYMENT_LOCK), repository_factory));
        debug!(?backend, "Lock registry opened");

        Self {
            backend,
            deployment: NamedLock::new(deployment),
            status: NamedLock::new(make(STATUS_LOCK)),
            hooks: NamedLock::new(make(HOOKS_LOCK)),
            ssh: NamedLock::new(make(SSH_LOCK)),
        }
    }

    pub fn backend(&self) -> LockBackend {
        self.backend
    }

    pub fn deployment(&self) -> &Arc<dyn OperationLock> {
        self.deployment.lock()
    }

    /// FIFO waiters on the deployment lock
    pub fn deployment_queue(&self) -> &AsyncLockQueue {
        self.deployment.queue()
    }

    pub fn status(&self) -> &Arc<dyn OperationLock> {
        self.status.lock()
    }

    pub fn get(&self, name: &str) -> Option<&NamedLock> {
        match name {
            DEPLOYMENT_LOCK => Some(&self.deployment),
            STATUS_LOCK => Some(&self.status),
            HOOKS_LOCK => Some(&self.hooks),
            SSH_LOCK => Some(&self.ssh),
            _ => None,
        }
    }

    pub fn names() -> [&'static str; 4] {
        [DEPLOYMENT_LOCK, STATUS_LOCK, HOOKS_LOCK, SSH_LOCK]
    }
}

/// `Auto` picks advisory locks wherever the platform provides them
pub fn resolve_backend(configured: LockBackend) -> LockBackend {
    match configured {
        LockBackend::Auto if cfg!(any(unix, windows)) => LockBackend::Advisory,
        LockBackend::Auto => LockBackend::Watch,
        other => other,
    }
}
