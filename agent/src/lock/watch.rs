//! Existence-based backend for file systems without advisory locks.
//!
//! The lock is held while the backing file exists. A holder that dies
//! without releasing leaves the file behind and the lock stays held until the
//! file is removed. [`WatchFileLock::with_max_age`] lets acquirers break
//! orphans older than a bound.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::lock::policy::AcquireFailurePolicy;
use crate::lock::{read_lock_info, write_lock_info, LockInfo, OperationLock};

const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Lock held while its backing file exists
#[derive(Debug)]
pub struct WatchFileLock {
    name: String,
    path: PathBuf,
    policy: AcquireFailurePolicy,
    max_age: Option<Duration>,
    handle: Mutex<Option<fs::File>>,
}

impl WatchFileLock {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, policy: AcquireFailurePolicy) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            policy,
            max_age: None,
            handle: Mutex::new(None),
        }
    }

    /// Treat lock files older than `max_age` as orphaned
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn create(&self) -> io::Result<fs::File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
    }

    fn try_acquire(&self) -> io::Result<Option<fs::File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        match self.create() {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !self.break_orphan() {
                    return Ok(None);
                }
                match self.create() {
                    Ok(file) => Ok(Some(file)),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn is_orphaned(&self, metadata: &fs::Metadata) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > max_age)
    }

    /// Delete the lock file if it outlived `max_age`
    fn break_orphan(&self) -> bool {
        let orphaned = fs::metadata(&self.path)
            .map(|meta| self.is_orphaned(&meta))
            .unwrap_or(false);
        if !orphaned {
            return false;
        }

        let holder = read_lock_info(&self.path);
        warn!(
            lock = %self.name,
            holder = holder.as_ref().map(|h| h.operation_name.as_str()).unwrap_or("unknown"),
            "Breaking orphaned lock file"
        );
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(lock = %self.name, error = %e, "Unable to delete orphaned lock file");
                false
            }
        }
    }
}

impl OperationLock for WatchFileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_held(&self) -> bool {
        if self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
        {
            return true;
        }

        match fs::metadata(&self.path) {
            Ok(meta) => !self.is_orphaned(&meta),
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(_) => true,
        }
    }

    fn lock(&self, operation: &str) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            debug!(lock = %self.name, operation, "Lock already held by this handle");
            return false;
        }

        match self.try_acquire() {
            Ok(Some(mut file)) => {
                if let Err(e) = write_lock_info(&mut file, &LockInfo::capture(operation)) {
                    warn!(lock = %self.name, error = %e, "Unable to record lock holder");
                }
                *handle = Some(file);
                debug!(lock = %self.name, operation, "Lock acquired");
                true
            }
            Ok(None) => {
                debug!(lock = %self.name, operation, "Lock held by another owner");
                false
            }
            Err(e) => self.policy.verdict(&self.name, &e),
        }
    }

    fn release(&self) {
        let Some(file) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        drop(file);

        for attempt in 1..=RELEASE_ATTEMPTS {
            match fs::remove_file(&self.path) {
                Ok(()) => {
                    debug!(lock = %self.name, "Lock released");
                    return;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return,
                Err(e) if attempt < RELEASE_ATTEMPTS => {
                    debug!(lock = %self.name, attempt, error = %e, "Retrying lock file delete");
                    std::thread::sleep(RELEASE_RETRY_DELAY);
                }
                Err(e) => {
                    warn!(lock = %self.name, error = %e, "Unable to delete lock file, lock stays held");
                }
            }
        }
    }

    fn lock_info(&self) -> Option<LockInfo> {
        if !self.is_held() {
            return None;
        }
        read_lock_info(&self.path)
    }
}
