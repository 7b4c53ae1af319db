//! FIFO waiting on a lock that is held by someone else.
//!
//! Waiters are woken by file system events on the lock directory, with a
//! periodic poll as a fallback when events are missed or unavailable.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lock::OperationLock;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Ownership handed to a waiter. Released again if the waiter is gone.
struct Grant {
    lock: Option<Arc<dyn OperationLock>>,
}

impl Grant {
    fn claim(mut self) {
        self.lock = None;
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            debug!(lock = %lock.name(), "Queued waiter went away, releasing");
            lock.release();
        }
    }
}

struct Waiter {
    operation: String,
    grant: oneshot::Sender<Grant>,
}

type Waiters = Arc<Mutex<VecDeque<Waiter>>>;

/// Grants a lock to async callers in arrival order.
///
/// Must be created inside a tokio runtime.
pub struct AsyncLockQueue {
    lock: Arc<dyn OperationLock>,
    waiters: Waiters,
    wake_tx: mpsc::UnboundedSender<()>,
    _watcher: Option<RecommendedWatcher>,
    drain_task: JoinHandle<()>,
}

impl AsyncLockQueue {
    pub fn new(lock: Arc<dyn OperationLock>) -> Self {
        Self::with_poll_interval(lock, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(lock: Arc<dyn OperationLock>, poll_interval: Duration) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let watcher = match watch_lock_file(lock.path(), wake_tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(lock = %lock.name(), error = %e, "Lock file watch unavailable, polling only");
                None
            }
        };

        let waiters: Waiters = Arc::new(Mutex::new(VecDeque::new()));
        let drain_task = tokio::spawn(run_drain(
            Arc::clone(&lock),
            Arc::clone(&waiters),
            wake_rx,
            poll_interval,
        ));

        Self {
            lock,
            waiters,
            wake_tx,
            _watcher: watcher,
            drain_task,
        }
    }

    /// Resolves to `true` once this caller owns the lock.
    ///
    /// Resolves to `false` only if the queue shuts down first. Dropping the
    /// future gives up the place in line.
    pub async fn lock_async(&self, operation: &str) -> bool {
        let rx = {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters.is_empty() && self.lock.lock(operation) {
                return true;
            }
            let (tx, rx) = oneshot::channel();
            waiters.push_back(Waiter {
                operation: operation.to_string(),
                grant: tx,
            });
            debug!(lock = %self.lock.name(), operation, queued = waiters.len(), "Waiting for lock");
            rx
        };
        let _ = self.wake_tx.send(());

        match rx.await {
            Ok(grant) => {
                grant.claim();
                true
            }
            Err(_) => false,
        }
    }

    /// Wait for the lock and hold it until the guard drops
    pub async fn acquire(&self, operation: &str) -> Option<QueueGuard<'_>> {
        self.lock_async(operation)
            .await
            .then_some(QueueGuard { queue: self })
    }

    /// Release the lock and hand it to the next waiter
    pub fn release(&self) {
        self.lock.release();
        let _ = self.wake_tx.send(());
    }

    /// Number of live waiters
    pub fn pending(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| !w.grant.is_closed())
            .count()
    }

    pub fn lock(&self) -> &Arc<dyn OperationLock> {
        &self.lock
    }
}

/// Holds a lock granted through [`AsyncLockQueue::acquire`]
pub struct QueueGuard<'a> {
    queue: &'a AsyncLockQueue,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}

impl Drop for AsyncLockQueue {
    fn drop(&mut self) {
        self.drain_task.abort();
    }
}

fn watch_lock_file(
    path: &Path,
    wake_tx: mpsc::UnboundedSender<()>,
) -> notify::Result<RecommendedWatcher> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = path.file_name().map(|n| n.to_os_string());

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
                {
                    let _ = wake_tx.send(());
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn run_drain(
    lock: Arc<dyn OperationLock>,
    waiters: Waiters,
    mut wake_rx: mpsc::UnboundedReceiver<()>,
    poll_interval: Duration,
) {
    loop {
        tokio::select! {
            msg = wake_rx.recv() => {
                if msg.is_none() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
        drain(&lock, &waiters);
    }
}

fn drain(lock: &Arc<dyn OperationLock>, waiters: &Mutex<VecDeque<Waiter>>) {
    let mut waiters = waiters.lock().unwrap_or_else(PoisonError::into_inner);
    while let Some(waiter) = waiters.pop_front() {
        if waiter.grant.is_closed() {
            continue;
        }
        if !lock.lock(&waiter.operation) {
            waiters.push_front(waiter);
            break;
        }
        debug!(lock = %lock.name(), operation = %waiter.operation, "Lock granted to waiter");
        // A failed send drops the grant, which releases for the next waiter
        let _ = waiter.grant.send(Grant {
            lock: Some(Arc::clone(lock)),
        });
    }
}
