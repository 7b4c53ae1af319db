//! Scoped lock acquisition

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::errors::AgentError;
use crate::lock::OperationLock;

/// Retry interval while waiting for a held lock
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Releases its lock when dropped
pub struct LockGuard {
    lock: Arc<dyn OperationLock>,
}

impl LockGuard {
    /// Single attempt
    pub fn try_acquire(lock: &Arc<dyn OperationLock>, operation: &str) -> Option<Self> {
        lock.lock(operation).then(|| Self {
            lock: Arc::clone(lock),
        })
    }

    pub fn lock(&self) -> &Arc<dyn OperationLock> {
        &self.lock
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Acquire `lock`, retrying until `timeout` elapses.
///
/// A zero timeout makes exactly one attempt.
pub async fn acquire_within(
    lock: &Arc<dyn OperationLock>,
    operation: &str,
    timeout: Duration,
) -> Result<LockGuard, AgentError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(guard) = LockGuard::try_acquire(lock, operation) {
            return Ok(guard);
        }

        let now = Instant::now();
        if now >= deadline {
            let holder = lock.lock_info().map(|info| info.operation_name);
            debug!(lock = %lock.name(), operation, ?holder, "Lock not acquired");
            return Err(AgentError::LockOperation {
                lock: lock.name().to_string(),
                operation: operation.to_string(),
            });
        }
        tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Run `action` while holding `lock`.
///
/// The lock is released on every exit path: success, error, panic
/// unwinding and cancellation of the returned future.
pub async fn lock_operation<T, F, Fut>(
    lock: &Arc<dyn OperationLock>,
    operation: &str,
    timeout: Duration,
    action: F,
) -> Result<T, AgentError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let guard = acquire_within(lock, operation, timeout).await?;
    let result = action().await;
    drop(guard);
    result
}
